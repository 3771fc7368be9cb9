//! Shared domain types for the Pulse asynchronous job subsystem.
//!
//! Zero internal dependencies: every other workspace crate builds on the
//! identifiers, queue payload, error taxonomy, retry policy and clock
//! abstraction defined here.

pub mod clock;
pub mod error;
pub mod job_events;
pub mod message;
pub mod retry;
pub mod types;
pub mod usage;
