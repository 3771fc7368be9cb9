//! Latency-simulating provider for development and tests.
//!
//! Stands in for a real provider when no API key is configured. Each job
//! "renders" for `duration × base + u × duration × jitter`, where `u` is
//! drawn from a generator seeded with the configured seed and the job id,
//! so the same seed and job always take the same time.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use pulse_core::types::JobId;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::Instant;

use crate::error::ProviderError;
use crate::provider::{GenerationRequest, PollStatus, ProviderPolicy, VideoProvider};

/// URL scheme of mock artifacts.
pub const MOCK_SCHEME: &str = "mock://";

/// Render time per second of requested video, before jitter.
const DEFAULT_BASE_PER_SECOND: Duration = Duration::from_millis(2000);

/// Upper bound of the random extra render time per second of video.
const DEFAULT_JITTER_PER_SECOND: Duration = Duration::from_millis(3000);

pub struct MockProvider {
    seed: u64,
    base_per_second: Duration,
    jitter_per_second: Duration,
    policy: ProviderPolicy,
    running: Mutex<HashMap<String, Render>>,
}

struct Render {
    job_id: JobId,
    started: Instant,
    latency: Duration,
}

impl MockProvider {
    pub fn new(seed: u64, policy: ProviderPolicy) -> Self {
        Self {
            seed,
            base_per_second: DEFAULT_BASE_PER_SECOND,
            jitter_per_second: DEFAULT_JITTER_PER_SECOND,
            policy,
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Override the per-second latency model.
    pub fn with_latency(mut self, base_per_second: Duration, jitter_per_second: Duration) -> Self {
        self.base_per_second = base_per_second;
        self.jitter_per_second = jitter_per_second;
        self
    }

    /// The simulated render time for `request`. Deterministic in
    /// `(seed, job_id, duration)`.
    pub fn latency_for(&self, request: &GenerationRequest) -> Duration {
        let (hi, lo) = request.job_id.as_u64_pair();
        let mut rng = StdRng::seed_from_u64(self.seed ^ hi ^ lo.rotate_left(32));
        let u: f64 = rng.random();
        let seconds = f64::from(request.duration);
        self.base_per_second.mul_f64(seconds) + self.jitter_per_second.mul_f64(u * seconds)
    }

    /// Deterministic stand-in bytes for a mock artifact.
    fn artifact_bytes(job_id: JobId) -> Vec<u8> {
        // An ISO-BMFF `ftyp` box so the upload looks like an mp4.
        let mut bytes = vec![0, 0, 0, 0x18];
        bytes.extend_from_slice(b"ftypmp42");
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        bytes.extend_from_slice(b"mp42isom");
        bytes.extend_from_slice(job_id.as_bytes());
        bytes
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Render>> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl VideoProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn policy(&self) -> &ProviderPolicy {
        &self.policy
    }

    async fn submit(&self, request: &GenerationRequest) -> Result<String, ProviderError> {
        let latency = self.latency_for(request);
        let remote_id = format!("mock-{}", request.job_id);
        tracing::info!(
            job_id = %request.job_id,
            latency_ms = latency.as_millis() as u64,
            "Using mock video generation",
        );
        // A resubmission restarts the render.
        self.lock().insert(
            remote_id.clone(),
            Render {
                job_id: request.job_id,
                started: Instant::now(),
                latency,
            },
        );
        Ok(remote_id)
    }

    async fn poll(&self, remote_id: &str) -> Result<PollStatus, ProviderError> {
        let mut running = self.lock();
        let Some(render) = running.get(remote_id) else {
            return Err(ProviderError::Rejected {
                status: 404,
                body: format!("no mock job {remote_id}"),
            });
        };

        let elapsed = render.started.elapsed();
        if elapsed >= render.latency {
            let url = format!("{MOCK_SCHEME}videos/{}/video.mp4", render.job_id);
            running.remove(remote_id);
            return Ok(PollStatus::Done(url));
        }
        let percent = (elapsed.as_secs_f64() / render.latency.as_secs_f64() * 100.0) as u8;
        Ok(PollStatus::Pending(percent.min(99)))
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ProviderError> {
        let job_id = url
            .strip_prefix(MOCK_SCHEME)
            .and_then(|rest| rest.strip_prefix("videos/"))
            .and_then(|rest| rest.split('/').next())
            .and_then(|id| id.parse::<JobId>().ok())
            .ok_or_else(|| ProviderError::Rejected {
                status: 404,
                body: format!("not a mock artifact: {url}"),
            })?;
        Ok(Self::artifact_bytes(job_id))
    }

    fn forget(&self, remote_id: &str) {
        self.lock().remove(remote_id);
    }
}
