//! Row types for the `jobs`, `usage_events` and `subscriptions` tables.

pub mod job;
pub mod status;
pub mod usage;
