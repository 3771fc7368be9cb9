//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&PgPool` (or a connection inside an open transaction) as the
//! first argument. Every status write is guarded by the expected current
//! status, so replaying a write against a row that has moved on is a
//! no-op that returns `None`.

pub mod job_repo;
pub mod usage_repo;

pub use job_repo::JobRepo;
pub use usage_repo::UsageRepo;
