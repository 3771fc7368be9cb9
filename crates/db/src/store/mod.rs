//! The job store seam.
//!
//! [`JobStore`] is what the dispatcher and the status publisher talk to.
//! It folds the Job Store and the Usage Ledger into one interface because
//! the `processing → completed` write and the usage insert must commit
//! together.
//!
//! - [`PgJobStore`]: Postgres, built on [`JobRepo`](crate::repositories::JobRepo)
//!   and [`UsageRepo`](crate::repositories::UsageRepo).
//! - [`MemoryJobStore`]: in-process, same transition rules; used by tests
//!   and local runs without a database.

use async_trait::async_trait;
use pulse_core::error::JobError;
use pulse_core::types::{JobId, UserId};

use crate::models::job::Job;
use crate::models::usage::{UsageCounters, UsageEvent, UsageRecord};

mod memory;
mod postgres;

pub use memory::MemoryJobStore;
pub use postgres::PgJobStore;

/// Result of a guarded state write.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// The write was applied; carries the updated row.
    Applied(Job),
    /// The row was not in an eligible status; carries the unchanged row.
    Skipped(Job),
    /// No row with that id.
    Missing,
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied(_))
    }

    /// The row after the write attempt, if it exists.
    pub fn job(&self) -> Option<&Job> {
        match self {
            Transition::Applied(job) | Transition::Skipped(job) => Some(job),
            Transition::Missing => None,
        }
    }
}

/// Errors from the job store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid write: {0}")]
    Invalid(String),
}

impl From<StoreError> for JobError {
    fn from(e: StoreError) -> Self {
        JobError::Store(e.to_string())
    }
}

/// Persistent job state plus the usage ledger.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get(&self, job_id: JobId) -> Result<Option<Job>, StoreError>;

    /// `pending | processing → processing`.
    async fn begin_processing(&self, job_id: JobId) -> Result<Transition, StoreError>;

    /// Raise progress of a `processing` job (never lowers it).
    async fn record_progress(&self, job_id: JobId, percent: u8) -> Result<Transition, StoreError>;

    /// `processing → completed` plus the usage event and counter increments,
    /// atomically. Usage is only charged when the transition applies.
    async fn complete(
        &self,
        job_id: JobId,
        result_url: &str,
        usage: &UsageRecord,
    ) -> Result<Transition, StoreError>;

    /// `processing → failed`.
    async fn fail(&self, job_id: JobId, error_message: &str) -> Result<Transition, StoreError>;

    async fn usage_events(&self, job_id: JobId) -> Result<Vec<UsageEvent>, StoreError>;

    async fn usage_counters(&self, user_id: UserId) -> Result<Option<UsageCounters>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

fn validate_result_url(result_url: &str) -> Result<(), StoreError> {
    if result_url.trim().is_empty() {
        return Err(StoreError::Invalid("completed job requires a result_url".into()));
    }
    Ok(())
}

fn validate_error_message(error_message: &str) -> Result<(), StoreError> {
    if error_message.trim().is_empty() {
        return Err(StoreError::Invalid("failed job requires an error_message".into()));
    }
    Ok(())
}
