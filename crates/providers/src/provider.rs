//! The provider adapter trait and its submit-and-poll driver.

use std::time::Duration;

use async_trait::async_trait;
use pulse_core::message::JobMessage;
use pulse_core::retry::RetryPolicy;
use pulse_core::types::{JobId, UserId};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::{GenerateError, ProviderError};

/// What a provider is asked to generate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    #[serde(skip)]
    pub job_id: JobId,
    #[serde(skip)]
    pub user_id: UserId,
    pub prompt: String,
    /// Output length in seconds.
    pub duration: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

impl From<&JobMessage> for GenerationRequest {
    fn from(msg: &JobMessage) -> Self {
        Self {
            job_id: msg.job_id,
            user_id: msg.user_id,
            prompt: msg.prompt.clone(),
            duration: msg.duration,
            style: msg.style.clone(),
            parameters: msg.parameters.clone(),
        }
    }
}

/// Result of one status poll.
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus {
    /// Still running, with a completion percentage (0-100).
    Pending(u8),
    /// Finished; carries the provider-hosted artifact URL.
    Done(String),
    /// The provider reported a failure.
    Failed(String),
}

/// Bounded polling schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    /// Maximum number of status polls before giving up.
    pub max_attempts: u32,
    /// Fixed delay between polls.
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 60,
            interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderPolicy {
    pub poll: PollPolicy,
    /// Applied to each individual submit and poll call.
    pub retry: RetryPolicy,
}

/// Callback for progress updates. Called with strictly increasing values.
pub type ProgressFn<'a> = &'a (dyn Fn(u8) + Send + Sync);

/// A remote video generation service.
#[async_trait]
pub trait VideoProvider: Send + Sync {
    fn name(&self) -> &str;

    fn policy(&self) -> &ProviderPolicy;

    /// Start a generation; returns the provider's job id.
    async fn submit(&self, request: &GenerationRequest) -> Result<String, ProviderError>;

    async fn poll(&self, remote_id: &str) -> Result<PollStatus, ProviderError>;

    /// Download a finished artifact.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ProviderError>;

    /// Drop any local state kept for `remote_id`. Called whenever
    /// [`generate`](Self::generate) stops following a remote job.
    fn forget(&self, _remote_id: &str) {}

    /// Submit `request` and poll until the provider finishes.
    ///
    /// Polls at most `policy().poll.max_attempts` times, sleeping
    /// `interval` between polls. Each call is retried on transient errors.
    /// `cancel` is checked before every poll and interrupts every wait.
    async fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
        on_progress: ProgressFn<'_>,
    ) -> Result<String, GenerateError> {
        let policy = self.policy();
        let name = self.name();

        if cancel.is_cancelled() {
            return Err(GenerateError::Cancelled);
        }
        let remote_id = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GenerateError::Cancelled),
            result = policy.retry.retry("submit", || self.submit(request), ProviderError::is_transient) => result?,
        };
        tracing::info!(
            provider = name,
            job_id = %request.job_id,
            remote_id = %remote_id,
            "Generation submitted",
        );
        let _following = Following {
            provider: self,
            remote_id: &remote_id,
        };

        let max_attempts = policy.poll.max_attempts;
        let mut last_progress = 0u8;
        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Err(GenerateError::Cancelled);
            }

            let status = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(GenerateError::Cancelled),
                result = policy.retry.retry("poll", || self.poll(&remote_id), ProviderError::is_transient) => result?,
            };

            match status {
                PollStatus::Done(url) => {
                    tracing::info!(provider = name, job_id = %request.job_id, attempt, "Generation finished");
                    return Ok(url);
                }
                PollStatus::Failed(reason) => {
                    tracing::warn!(provider = name, job_id = %request.job_id, reason = %reason, "Generation failed");
                    return Err(ProviderError::Failed(reason).into());
                }
                PollStatus::Pending(progress) => {
                    let progress = progress.min(99);
                    if progress > last_progress {
                        last_progress = progress;
                        on_progress(progress);
                    }
                    tracing::debug!(provider = name, job_id = %request.job_id, attempt, progress, "Generation pending");
                }
            }

            if attempt < max_attempts {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(GenerateError::Cancelled),
                    _ = tokio::time::sleep(policy.poll.interval) => {}
                }
            }
        }

        tracing::warn!(provider = name, job_id = %request.job_id, attempts = max_attempts, "Poll budget exhausted");
        Err(GenerateError::Timeout {
            provider: name.to_string(),
            attempts: max_attempts,
        })
    }
}

/// Calls [`VideoProvider::forget`] on drop, so a remote job is released on
/// every exit from the poll loop, including a dropped future.
struct Following<'a, P: VideoProvider + ?Sized> {
    provider: &'a P,
    remote_id: &'a str,
}

impl<P: VideoProvider + ?Sized> Drop for Following<'_, P> {
    fn drop(&mut self) {
        self.provider.forget(self.remote_id);
    }
}
