//! Runway adapter.
//!
//! `POST /v1/generate` starts a task, `GET /v1/jobs/{id}` reports it.
//! Task status is upper-case (`PENDING`, `RUNNING`, `THROTTLED`,
//! `SUCCEEDED`, `FAILED`); progress is a 0..1 fraction.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::ProviderError;
use crate::http::{remote_id, ApiClient, ApiConfig};
use crate::provider::{GenerationRequest, PollStatus, ProviderPolicy, VideoProvider};

pub const DEFAULT_BASE_URL: &str = "https://api.runwayml.com";

/// API version pinned via the `X-Runway-Version` header.
const API_VERSION: &str = "2024-11-06";

pub struct RunwayProvider {
    api: ApiClient,
    policy: ProviderPolicy,
}

impl RunwayProvider {
    pub fn new(client: reqwest::Client, config: ApiConfig, policy: ProviderPolicy) -> Self {
        Self {
            api: ApiClient::new(client, config).with_header("x-runway-version", API_VERSION),
            policy,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RunwayTask {
    status: String,
    #[serde(default)]
    progress: Option<f64>,
    #[serde(default)]
    output: Option<Vec<String>>,
    #[serde(default)]
    video_url: Option<String>,
    #[serde(default)]
    failure: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

fn interpret(task: RunwayTask) -> Result<PollStatus, ProviderError> {
    match task.status.to_ascii_uppercase().as_str() {
        "PENDING" | "RUNNING" | "THROTTLED" | "QUEUED" => {
            let fraction = task.progress.unwrap_or(0.0).clamp(0.0, 1.0);
            Ok(PollStatus::Pending((fraction * 100.0).round() as u8))
        }
        "SUCCEEDED" | "COMPLETED" => task
            .output
            .and_then(|urls| urls.into_iter().next())
            .or(task.video_url)
            .map(PollStatus::Done)
            .ok_or_else(|| ProviderError::InvalidResponse("finished task has no output".into())),
        "FAILED" | "CANCELLED" => Ok(PollStatus::Failed(
            task.failure
                .or(task.error)
                .unwrap_or_else(|| "runway task failed".to_string()),
        )),
        other => Err(ProviderError::InvalidResponse(format!("unknown task status {other:?}"))),
    }
}

#[async_trait]
impl VideoProvider for RunwayProvider {
    fn name(&self) -> &str {
        "runway"
    }

    fn policy(&self) -> &ProviderPolicy {
        &self.policy
    }

    async fn submit(&self, request: &GenerationRequest) -> Result<String, ProviderError> {
        let response: serde_json::Value = self.api.post_json("/v1/generate", request).await?;
        remote_id(&response)
    }

    async fn poll(&self, remote_id: &str) -> Result<PollStatus, ProviderError> {
        let task: RunwayTask = self.api.get_json(&format!("/v1/jobs/{remote_id}")).await?;
        interpret(task)
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ProviderError> {
        self.api.download(url).await
    }
}
