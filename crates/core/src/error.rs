//! Job-level error taxonomy.
//!
//! Lower layers (providers, storage, queue, store) define their own error
//! enums and convert into [`JobError`] at the dispatcher boundary. The
//! dispatcher only needs the classification helpers to decide between
//! "record a terminal failure", "leave for redelivery" and "apply the
//! unroutable-message policy".

use crate::types::JobId;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// The remote provider rejected the request or reported a failure.
    #[error("provider error: {0}")]
    Provider(String),

    /// The poll-attempt budget was exhausted without a terminal result.
    #[error("provider {provider} timed out after {attempts} poll attempts")]
    Timeout { provider: String, attempts: u32 },

    /// Generation succeeded but the artifact could not be persisted.
    #[error("artifact upload failed: {0}")]
    Upload(String),

    /// The message names a job type with no registered pipeline.
    #[error("unknown job type: {0}")]
    UnknownJobType(String),

    /// The message body is missing or is not a valid job message.
    #[error("malformed job message: {0}")]
    Malformed(String),

    /// The message references a job row that does not exist.
    #[error("job {0} not found")]
    JobNotFound(JobId),

    /// Queue transport failure.
    #[error("queue error: {0}")]
    Queue(String),

    /// Job store failure (database unavailable, transaction aborted).
    #[error("job store error: {0}")]
    Store(String),

    /// The job was cancelled by request.
    #[error("cancelled")]
    Cancelled,

    /// Processing was abandoned during shutdown; the message will be redelivered.
    #[error("abandoned during shutdown")]
    Abandoned,
}

impl JobError {
    /// Messages that cannot be matched to a job pipeline. These are left
    /// for redelivery and dead-lettered after a bounded receive count.
    pub fn is_unroutable(&self) -> bool {
        matches!(
            self,
            JobError::UnknownJobType(_) | JobError::Malformed(_) | JobError::JobNotFound(_)
        )
    }

    /// Errors that end the job: they are written to the job row as
    /// `failed` and the message is acknowledged.
    pub fn is_terminal_failure(&self) -> bool {
        matches!(
            self,
            JobError::Provider(_) | JobError::Timeout { .. } | JobError::Upload(_) | JobError::Cancelled
        )
    }

    /// User-visible text stored in the job's `error_message`.
    pub fn user_message(&self) -> String {
        self.to_string()
    }
}
