use pulse_core::types::{JobId, Timestamp};
use pulse_db::models::job::Job;
use pulse_db::models::status::JobStatus;
use serde::{Deserialize, Serialize};

/// Point-in-time view of a job, as streamed to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub job_type: String,
    pub provider: String,
    pub status: JobStatus,
    pub progress: i16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub updated_at: Timestamp,
}

impl JobSnapshot {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

impl From<&Job> for JobSnapshot {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            job_type: job.job_type.clone(),
            provider: job.provider.clone(),
            status: job.status,
            progress: job.progress,
            result_url: job.result_url.clone(),
            error_message: job.error_message.clone(),
            updated_at: job.updated_at,
        }
    }
}
