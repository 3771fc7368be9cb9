//! Job entity model.

use pulse_core::types::{JobId, Timestamp, UserId};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::status::JobStatus;

/// A row from the `jobs` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub user_id: UserId,
    pub job_type: String,
    pub provider: String,
    pub status: JobStatus,
    /// Completion percentage (0-100). Never decreases.
    pub progress: i16,
    /// Signed artifact URL; present iff `status = completed`.
    pub result_url: Option<String>,
    /// User-visible failure reason; present iff `status = failed`.
    pub error_message: Option<String>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub updated_at: Timestamp,
}

/// Input for creating a `pending` job row (the request-serving API's side
/// of the contract).
#[derive(Debug, Clone, Deserialize)]
pub struct NewJob {
    pub id: JobId,
    pub user_id: UserId,
    pub job_type: String,
    pub provider: String,
}
