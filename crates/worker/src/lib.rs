//! The asynchronous job worker.
//!
//! - [`queue`]: the durable queue seam ([`queue::JobQueue`]) with SQS and
//!   in-memory implementations.
//! - [`processor`]: runs one job: provider generation, artifact upload,
//!   completion with usage, status publishing.
//! - [`dispatcher`]: the receive loop: bounded concurrency, message
//!   acknowledgement policy, visibility heartbeat, cancellation, shutdown.
//! - [`server`]: health, job status stream and cancel endpoints.
//! - [`config`]: environment-driven configuration.

pub mod config;
pub mod dispatcher;
pub mod processor;
pub mod queue;
pub mod server;
