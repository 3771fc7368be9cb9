//! Live job status streams.
//!
//! - [`JobSnapshot`]: the externally visible view of a job row.
//! - [`StatusPublisher`]: per-job latest-value channels that the worker
//!   publishes to after every state write, and that clients subscribe to.

pub mod publisher;
pub mod snapshot;

pub use publisher::{SnapshotStream, StatusPublisher, SubscribeError};
pub use snapshot::JobSnapshot;
