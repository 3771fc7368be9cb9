//! Provider error taxonomy.

use pulse_core::error::JobError;

/// Errors from a single provider call.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Network failure, timeout, 429 or 5xx. Worth retrying.
    #[error("transient provider failure: {0}")]
    Transient(String),

    /// The provider refused the request (4xx other than 429).
    #[error("provider rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// The provider accepted the job but reported that generation failed.
    #[error("generation failed: {0}")]
    Failed(String),

    /// The provider answered with something we could not interpret.
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    /// No adapter is registered under the requested name.
    #[error("unsupported provider: {0}")]
    Unsupported(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ProviderError::InvalidResponse(e.to_string())
        } else {
            ProviderError::Transient(e.to_string())
        }
    }
}

/// Errors from a full submit-and-poll generation run.
#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The poll budget ran out without a terminal status.
    #[error("{provider} did not finish within {attempts} polls")]
    Timeout { provider: String, attempts: u32 },

    /// The cancellation token fired.
    #[error("generation cancelled")]
    Cancelled,
}

impl From<ProviderError> for JobError {
    fn from(e: ProviderError) -> Self {
        JobError::Provider(e.to_string())
    }
}

impl From<GenerateError> for JobError {
    fn from(e: GenerateError) -> Self {
        match e {
            GenerateError::Provider(e) => e.into(),
            GenerateError::Timeout { provider, attempts } => JobError::Timeout { provider, attempts },
            GenerateError::Cancelled => JobError::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn only_transient_errors_retry() {
        assert!(ProviderError::Transient("503".into()).is_transient());
        assert!(!ProviderError::Rejected { status: 400, body: String::new() }.is_transient());
        assert!(!ProviderError::Failed("nsfw".into()).is_transient());
        assert!(!ProviderError::Unsupported("sora".into()).is_transient());
    }

    #[test]
    fn timeout_maps_to_job_timeout() {
        let err: JobError = GenerateError::Timeout {
            provider: "pika".into(),
            attempts: 60,
        }
        .into();
        assert_matches!(err, JobError::Timeout { attempts: 60, .. });
        assert!(err.is_terminal_failure());
    }

    #[test]
    fn unsupported_provider_is_a_terminal_failure() {
        let err: JobError = ProviderError::Unsupported("sora".into()).into();
        assert_matches!(&err, JobError::Provider(msg) if msg.contains("sora"));
        assert!(err.is_terminal_failure());
    }
}
