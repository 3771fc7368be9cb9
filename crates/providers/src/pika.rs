//! Pika adapter.
//!
//! Same request shape as Runway; statuses are lower-case (`queued`,
//! `processing`, `completed`, `failed`) and progress is a percentage.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::ProviderError;
use crate::http::{remote_id, ApiClient, ApiConfig};
use crate::provider::{GenerationRequest, PollStatus, ProviderPolicy, VideoProvider};

pub const DEFAULT_BASE_URL: &str = "https://api.pika.art";

pub struct PikaProvider {
    api: ApiClient,
    policy: ProviderPolicy,
}

impl PikaProvider {
    pub fn new(client: reqwest::Client, config: ApiConfig, policy: ProviderPolicy) -> Self {
        Self {
            api: ApiClient::new(client, config),
            policy,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PikaJob {
    status: String,
    #[serde(default)]
    progress: Option<f64>,
    #[serde(default)]
    video_url: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

fn interpret(job: PikaJob) -> Result<PollStatus, ProviderError> {
    match job.status.to_ascii_lowercase().as_str() {
        "queued" | "pending" | "processing" => {
            let percent = job.progress.unwrap_or(0.0).clamp(0.0, 100.0);
            Ok(PollStatus::Pending(percent.round() as u8))
        }
        "completed" | "finished" => job
            .video_url
            .map(PollStatus::Done)
            .ok_or_else(|| ProviderError::InvalidResponse("completed job has no video_url".into())),
        "failed" => Ok(PollStatus::Failed(
            job.error.unwrap_or_else(|| "pika job failed".to_string()),
        )),
        other => Err(ProviderError::InvalidResponse(format!("unknown job status {other:?}"))),
    }
}

#[async_trait]
impl VideoProvider for PikaProvider {
    fn name(&self) -> &str {
        "pika"
    }

    fn policy(&self) -> &ProviderPolicy {
        &self.policy
    }

    async fn submit(&self, request: &GenerationRequest) -> Result<String, ProviderError> {
        let response: serde_json::Value = self.api.post_json("/v1/generate", request).await?;
        remote_id(&response)
    }

    async fn poll(&self, remote_id: &str) -> Result<PollStatus, ProviderError> {
        let job: PikaJob = self.api.get_json(&format!("/v1/jobs/{remote_id}")).await?;
        interpret(job)
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ProviderError> {
        self.api.download(url).await
    }
}
