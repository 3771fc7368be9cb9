//! Copies generated artifacts from provider hosting into our bucket.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pulse_core::error::JobError;
use pulse_core::retry::RetryPolicy;
use pulse_core::types::{JobId, UserId};

use crate::error::StorageError;
use crate::object_store::{ObjectStore, PutObject};

/// Default lifetime of the signed URL stored on a completed job.
pub const DEFAULT_URL_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Where an artifact's bytes come from (normally the provider that made it).
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct FetchError {
    pub transient: bool,
    pub message: String,
}

/// Kind of artifact, which fixes its key layout and content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactCategory {
    Video,
}

impl ArtifactCategory {
    pub fn prefix(self) -> &'static str {
        match self {
            ArtifactCategory::Video => "videos",
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            ArtifactCategory::Video => "video.mp4",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ArtifactCategory::Video => "video/mp4",
        }
    }

    /// `{prefix}/{user_id}/{job_id}/{file}`.
    pub fn object_key(self, user_id: UserId, job_id: JobId) -> String {
        format!("{}/{user_id}/{job_id}/{}", self.prefix(), self.file_name())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("could not download artifact: {0}")]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<UploadError> for JobError {
    fn from(e: UploadError) -> Self {
        JobError::Upload(e.to_string())
    }
}

pub struct ArtifactUploader {
    store: Arc<dyn ObjectStore>,
    url_ttl: Duration,
    retry: RetryPolicy,
}

impl ArtifactUploader {
    pub fn new(store: Arc<dyn ObjectStore>, url_ttl: Duration, retry: RetryPolicy) -> Self {
        Self { store, url_ttl, retry }
    }

    /// Download `remote_url` from `source`, store it under the job's key and
    /// return a signed GET URL valid for the configured TTL.
    pub async fn persist(
        &self,
        source: &dyn ArtifactSource,
        remote_url: &str,
        job_id: JobId,
        user_id: UserId,
        category: ArtifactCategory,
    ) -> Result<String, UploadError> {
        let bytes = self
            .retry
            .retry("artifact fetch", || source.fetch(remote_url), |e: &FetchError| e.transient)
            .await?;

        let key = category.object_key(user_id, job_id);
        let object = PutObject {
            key: key.clone(),
            bytes,
            content_type: category.content_type().to_string(),
            metadata: HashMap::from([
                ("user_id".to_string(), user_id.to_string()),
                ("job_id".to_string(), job_id.to_string()),
            ]),
        };
        self.retry
            .retry("artifact put", || self.store.put(object.clone()), StorageError::is_transient)
            .await?;

        let url = self.store.presign_get(&key, self.url_ttl).await?;
        tracing::info!(job_id = %job_id, key = %key, "Artifact persisted");
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use assert_matches::assert_matches;
    use pulse_core::clock::ManualClock;

    use super::*;
    use crate::memory::MemoryObjectStore;

    /// Serves fixed bytes after `failures` errors.
    struct Flaky {
        failures: u32,
        transient: bool,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ArtifactSource for Flaky {
        async fn fetch(&self, _url: &str) -> Result<Vec<u8>, FetchError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(FetchError {
                    transient: self.transient,
                    message: "connection reset".into(),
                });
            }
            Ok(b"video-bytes".to_vec())
        }
    }

    fn source(failures: u32, transient: bool) -> Flaky {
        Flaky {
            failures,
            transient,
            calls: AtomicU32::new(0),
        }
    }

    fn setup() -> (Arc<MemoryObjectStore>, ArtifactUploader) {
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(MemoryObjectStore::new("pulse-test", clock));
        let uploader = ArtifactUploader::new(store.clone(), DEFAULT_URL_TTL, RetryPolicy::default());
        (store, uploader)
    }

    #[tokio::test(start_paused = true)]
    async fn stores_under_job_key_with_metadata() {
        let (store, uploader) = setup();
        let job_id = uuid::Uuid::new_v4();
        let user_id = uuid::Uuid::new_v4();

        let url = uploader
            .persist(&source(0, true), "https://cdn/x.mp4", job_id, user_id, ArtifactCategory::Video)
            .await
            .unwrap();

        let key = format!("videos/{user_id}/{job_id}/video.mp4");
        let object = store.object(&key).await.unwrap();
        assert_eq!(object.content_type, "video/mp4");
        assert_eq!(object.metadata["user_id"], user_id.to_string());
        assert_eq!(object.metadata["job_id"], job_id.to_string());
        assert_eq!(store.resolve(&url).await.unwrap(), b"video-bytes");
    }

    #[tokio::test(start_paused = true)]
    async fn transient_fetch_and_put_failures_are_retried() {
        let (store, uploader) = setup();
        store.fail_next_puts(2);
        let flaky = source(2, true);

        let url = uploader
            .persist(&flaky, "https://cdn/x.mp4", uuid::Uuid::new_v4(), uuid::Uuid::new_v4(), ArtifactCategory::Video)
            .await;

        assert!(url.is_ok());
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_fetch_failure_is_not_retried() {
        let (store, uploader) = setup();
        let broken = source(1, false);

        let result = uploader
            .persist(&broken, "https://cdn/x.mp4", uuid::Uuid::new_v4(), uuid::Uuid::new_v4(), ArtifactCategory::Video)
            .await;

        assert_matches!(result, Err(UploadError::Fetch(_)));
        assert_eq!(broken.calls.load(Ordering::SeqCst), 1);
        assert!(store.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_put_retries_surface_as_upload_error() {
        let (store, uploader) = setup();
        store.fail_next_puts(10);

        let result = uploader
            .persist(&source(0, true), "https://cdn/x.mp4", uuid::Uuid::new_v4(), uuid::Uuid::new_v4(), ArtifactCategory::Video)
            .await;

        assert_matches!(result, Err(UploadError::Storage(StorageError::Unavailable(_))));
        let job_error: JobError = result.unwrap_err().into();
        assert_matches!(job_error, JobError::Upload(_));
    }
}
