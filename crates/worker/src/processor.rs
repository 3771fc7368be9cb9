//! Runs one job from message to terminal row.
//!
//! Every state write goes through the [`JobStore`]'s status-guarded
//! transitions and is followed by a publish, so running the same message
//! twice, concurrently or after completion, never changes a terminal row
//! and never charges usage twice.

use std::sync::Arc;

use async_trait::async_trait;
use pulse_core::error::JobError;
use pulse_core::message::{JobMessage, JobType};
use pulse_core::retry::RetryPolicy;
use pulse_core::types::JobId;
use pulse_core::usage::{UsageFeature, UsageMetrics};
use pulse_db::models::job::Job;
use pulse_db::models::usage::UsageRecord;
use pulse_db::store::{JobStore, StoreError, Transition};
use pulse_events::StatusPublisher;
use pulse_providers::{GenerateError, GenerationRequest, ProviderRegistry, VideoProvider};
use pulse_storage::{ArtifactCategory, ArtifactSource, ArtifactUploader, FetchError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// How a processed message ended. Every variant acknowledges the message.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed(Job),
    Failed(Job),
    /// The row was already terminal; nothing was written.
    AlreadyTerminal(Job),
}

impl Outcome {
    pub fn job(&self) -> &Job {
        match self {
            Outcome::Completed(job) | Outcome::Failed(job) | Outcome::AlreadyTerminal(job) => job,
        }
    }
}

/// Cancellation handles for one job run.
///
/// `cancel` is tripped by an explicit cancel request; `abandon` is the
/// worker-wide shutdown token. Tripping `abandon` also trips `cancel`.
#[derive(Debug, Clone)]
pub struct JobControl {
    cancel: CancellationToken,
    abandon: CancellationToken,
}

impl JobControl {
    pub fn new(abandon: &CancellationToken) -> Self {
        Self {
            cancel: abandon.child_token(),
            abandon: abandon.clone(),
        }
    }

    /// Request cancellation of this job only.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_abandoned(&self) -> bool {
        self.abandon.is_cancelled()
    }
}

/// Only video jobs run through the asynchronous pipeline.
pub fn route(message: &JobMessage) -> Result<JobType, JobError> {
    match message.job_type.parse::<JobType>() {
        Ok(JobType::Video) => Ok(JobType::Video),
        _ => Err(JobError::UnknownJobType(message.job_type.clone())),
    }
}

pub struct JobProcessor {
    store: Arc<dyn JobStore>,
    publisher: Arc<StatusPublisher>,
    providers: ProviderRegistry,
    uploader: ArtifactUploader,
    write_retry: RetryPolicy,
}

impl JobProcessor {
    pub fn new(
        store: Arc<dyn JobStore>,
        publisher: Arc<StatusPublisher>,
        providers: ProviderRegistry,
        uploader: ArtifactUploader,
        write_retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            publisher,
            providers,
            uploader,
            write_retry,
        }
    }

    /// Process one message.
    ///
    /// `Ok` means the message can be acknowledged. Unroutable messages,
    /// store failures and abandonment return `Err` and leave the row for
    /// the next delivery.
    pub async fn process(&self, message: &JobMessage, control: &JobControl) -> Result<Outcome, JobError> {
        let job_type = route(message)?;
        let job_id = message.job_id;

        let current = self.store.get(job_id).await?.ok_or(JobError::JobNotFound(job_id))?;
        if current.status.is_terminal() {
            tracing::info!(job_id = %job_id, status = %current.status, "Job already terminal, skipping");
            return Ok(Outcome::AlreadyTerminal(current));
        }

        let job = match self.store.begin_processing(job_id).await? {
            Transition::Applied(job) => job,
            Transition::Skipped(job) => return Ok(Outcome::AlreadyTerminal(job)),
            Transition::Missing => return Err(JobError::JobNotFound(job_id)),
        };
        self.publisher.publish(&job);
        tracing::info!(
            job_id = %job_id,
            provider = %message.provider,
            duration = message.duration,
            "Job processing started",
        );

        let provider = match self.providers.resolve(&message.provider) {
            Ok(provider) => provider,
            Err(e) => return self.fail(job_id, e.into(), control).await,
        };

        let request = GenerationRequest::from(message);
        let remote_url = match self.generate(provider.as_ref(), &request, control.token()).await {
            Ok(url) => url,
            Err(GenerateError::Cancelled) if control.is_abandoned() => return Err(JobError::Abandoned),
            Err(e) => return self.fail(job_id, e.into(), control).await,
        };

        let source = ProviderSource(provider.as_ref());
        let upload = self.uploader.persist(
            &source,
            &remote_url,
            job_id,
            job.user_id,
            ArtifactCategory::Video,
        );
        let result_url = tokio::select! {
            biased;
            _ = control.abandon.cancelled() => return Err(JobError::Abandoned),
            result = upload => match result {
                Ok(url) => url,
                Err(e) => return self.fail(job_id, e.into(), control).await,
            },
        };

        if control.is_abandoned() {
            return Err(JobError::Abandoned);
        }
        let usage = UsageRecord {
            job_id,
            user_id: job.user_id,
            feature: UsageFeature::from(job_type),
            metrics: UsageMetrics::video(message.duration),
            metadata: serde_json::json!({
                "provider": message.provider,
                "duration": message.duration,
                "style": message.style,
            }),
        };
        let transition = self
            .write_retry
            .retry(
                "complete job",
                || self.store.complete(job_id, &result_url, &usage),
                |e: &StoreError| matches!(e, StoreError::Database(_)),
            )
            .await?;

        match transition {
            Transition::Applied(job) => {
                self.publisher.publish(&job);
                tracing::info!(job_id = %job_id, result_url = %result_url, "Job completed");
                Ok(Outcome::Completed(job))
            }
            Transition::Skipped(job) => {
                tracing::info!(job_id = %job_id, status = %job.status, "Job finished elsewhere, completion skipped");
                Ok(Outcome::AlreadyTerminal(job))
            }
            Transition::Missing => Err(JobError::JobNotFound(job_id)),
        }
    }

    // ---- private helpers ----

    /// Run the provider, persisting and publishing progress as it arrives.
    async fn generate(
        &self,
        provider: &dyn VideoProvider,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<String, GenerateError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<u8>();
        let generation = async move {
            let report = move |percent: u8| {
                let _ = tx.send(percent);
            };
            provider.generate(request, cancel, &report).await
        };
        let progress = async {
            while let Some(percent) = rx.recv().await {
                self.record_progress(request.job_id, percent).await;
            }
        };
        let (result, ()) = tokio::join!(generation, progress);
        result
    }

    async fn record_progress(&self, job_id: JobId, percent: u8) {
        match self.store.record_progress(job_id, percent).await {
            Ok(Transition::Applied(job)) => self.publisher.publish(&job),
            Ok(_) => {}
            Err(e) => tracing::warn!(job_id = %job_id, percent, error = %e, "Failed to record progress"),
        }
    }

    async fn fail(&self, job_id: JobId, error: JobError, control: &JobControl) -> Result<Outcome, JobError> {
        if control.is_abandoned() {
            return Err(JobError::Abandoned);
        }
        // Only job-ending errors reach the row; the rest go back to the dispatcher.
        if !error.is_terminal_failure() {
            return Err(error);
        }
        tracing::warn!(job_id = %job_id, error = %error, "Job failed");
        match self.store.fail(job_id, &error.user_message()).await? {
            Transition::Applied(job) => {
                self.publisher.publish(&job);
                Ok(Outcome::Failed(job))
            }
            Transition::Skipped(job) => Ok(Outcome::AlreadyTerminal(job)),
            Transition::Missing => Err(JobError::JobNotFound(job_id)),
        }
    }
}

/// Downloads artifacts through the provider that produced them.
struct ProviderSource<'a>(&'a dyn VideoProvider);

#[async_trait]
impl<'a> ArtifactSource for ProviderSource<'a> {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.0.fetch(url).await.map_err(|e| FetchError {
            transient: e.is_transient(),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use pulse_core::clock::ManualClock;
    use pulse_core::message::ProviderKind;
    use pulse_db::models::job::NewJob;
    use pulse_db::models::status::JobStatus;
    use pulse_db::store::MemoryJobStore;
    use pulse_providers::{MockProvider, PollPolicy, ProviderPolicy};
    use pulse_storage::uploader::DEFAULT_URL_TTL;
    use pulse_storage::MemoryObjectStore;

    use super::*;

    struct Fixture {
        store: Arc<MemoryJobStore>,
        objects: Arc<MemoryObjectStore>,
        processor: JobProcessor,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(MemoryJobStore::new(clock.clone()));
        let objects = Arc::new(MemoryObjectStore::new("pulse-test", clock));
        let publisher = Arc::new(StatusPublisher::new(store.clone()));

        let policy = ProviderPolicy {
            poll: PollPolicy {
                max_attempts: 10,
                interval: Duration::from_secs(1),
            },
            retry: RetryPolicy::none(),
        };
        let mock = MockProvider::new(7, policy).with_latency(Duration::from_secs(1), Duration::ZERO);
        let mut providers = ProviderRegistry::new();
        providers.register(ProviderKind::Mock, Arc::new(mock));

        let uploader = ArtifactUploader::new(objects.clone(), DEFAULT_URL_TTL, RetryPolicy::none());
        let processor = JobProcessor::new(store.clone(), publisher, providers, uploader, RetryPolicy::none());
        Fixture {
            store,
            objects,
            processor,
        }
    }

    async fn seed(store: &MemoryJobStore, provider: &str) -> JobMessage {
        let job = store
            .insert(NewJob {
                id: uuid::Uuid::new_v4(),
                user_id: uuid::Uuid::new_v4(),
                job_type: "video".into(),
                provider: provider.into(),
            })
            .await;
        JobMessage {
            job_id: job.id,
            user_id: job.user_id,
            job_type: "video".into(),
            provider: provider.into(),
            prompt: "a paper boat on a river".into(),
            duration: 4,
            style: Some("watercolor".into()),
            parameters: None,
        }
    }

    fn control() -> JobControl {
        JobControl::new(&CancellationToken::new())
    }

    #[tokio::test(start_paused = true)]
    async fn completes_with_upload_and_usage() {
        let f = fixture();
        let msg = seed(&f.store, "mock").await;

        let outcome = f.processor.process(&msg, &control()).await.unwrap();

        let job = assert_matches!(outcome, Outcome::Completed(job) => job);
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        let url = job.result_url.unwrap();
        assert_eq!(f.objects.resolve(&url).await.unwrap()[4..8], *b"ftyp");

        let events = f.store.usage_events(msg.job_id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "video_generation");
        assert_eq!(events[0].video_seconds, 4);
        assert_eq!(events[0].metadata["provider"], "mock");
        assert_eq!(events[0].metadata["style"], "watercolor");
    }

    #[tokio::test(start_paused = true)]
    async fn progress_is_persisted_while_running() {
        let f = fixture();
        let msg = seed(&f.store, "mock").await;

        let store = f.store.clone();
        let job_id = msg.job_id;
        let watcher = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            store.get(job_id).await.unwrap().unwrap()
        });
        f.processor.process(&msg, &control()).await.unwrap();

        let midway = watcher.await.unwrap();
        assert_eq!(midway.status, JobStatus::Processing);
        assert!(midway.progress > 0 && midway.progress < 100, "{}", midway.progress);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_job_is_left_alone() {
        let f = fixture();
        let msg = seed(&f.store, "mock").await;
        f.processor.process(&msg, &control()).await.unwrap();
        let before = f.store.get(msg.job_id).await.unwrap().unwrap();

        let again = f.processor.process(&msg, &control()).await.unwrap();

        assert_eq!(again, Outcome::AlreadyTerminal(before.clone()));
        assert_eq!(f.store.get(msg.job_id).await.unwrap().unwrap(), before);
        assert_eq!(f.store.usage_events(msg.job_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unsupported_provider_fails_the_job() {
        let f = fixture();
        let msg = seed(&f.store, "sora").await;

        let outcome = f.processor.process(&msg, &control()).await.unwrap();

        let job = assert_matches!(outcome, Outcome::Failed(job) => job);
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error_message.unwrap().contains("sora"));
        assert!(job.result_url.is_none());
        assert!(f.store.usage_events(msg.job_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn other_job_types_are_unroutable() {
        let f = fixture();
        let mut msg = seed(&f.store, "mock").await;
        msg.job_type = "slides".into();

        let err = f.processor.process(&msg, &control()).await.unwrap_err();

        assert_matches!(err, JobError::UnknownJobType(t) if t == "slides");
        let job = f.store.get(msg.job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn missing_row_is_unroutable() {
        let f = fixture();
        let mut msg = seed(&f.store, "mock").await;
        msg.job_id = uuid::Uuid::new_v4();

        let err = f.processor.process(&msg, &control()).await.unwrap_err();
        assert_matches!(err, JobError::JobNotFound(id) if id == msg.job_id);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_cancel_marks_the_job_cancelled() {
        let f = fixture();
        let msg = seed(&f.store, "mock").await;
        let control = control();

        let trip = control.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            trip.cancel();
        });
        let outcome = f.processor.process(&msg, &control).await.unwrap();

        let job = assert_matches!(outcome, Outcome::Failed(job) => job);
        assert_eq!(job.error_message.as_deref(), Some("cancelled"));
        assert!(f.objects.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_job_stays_processing() {
        let f = fixture();
        let msg = seed(&f.store, "mock").await;
        let shutdown = CancellationToken::new();
        let control = JobControl::new(&shutdown);

        let trip = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            trip.cancel();
        });
        let err = f.processor.process(&msg, &control).await.unwrap_err();

        assert_matches!(err, JobError::Abandoned);
        let job = f.store.get(msg.job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert!(job.error_message.is_none());
    }

    #[tokio::test]
    async fn infrastructure_errors_are_not_written_as_failures() {
        let f = fixture();
        let msg = seed(&f.store, "mock").await;
        f.store.begin_processing(msg.job_id).await.unwrap();

        let err = f
            .processor
            .fail(msg.job_id, JobError::Store("pool timed out".into()), &control())
            .await
            .unwrap_err();

        assert_matches!(err, JobError::Store(_));
        let job = f.store.get(msg.job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert!(job.error_message.is_none());
    }

    #[test]
    fn routing_is_case_insensitive_and_video_only() {
        let mut msg = JobMessage {
            job_id: uuid::Uuid::nil(),
            user_id: uuid::Uuid::nil(),
            job_type: "VIDEO".into(),
            provider: "mock".into(),
            prompt: String::new(),
            duration: 4,
            style: None,
            parameters: None,
        };
        assert_eq!(route(&msg).unwrap(), JobType::Video);

        msg.job_type = "hologram".into();
        assert_matches!(route(&msg), Err(JobError::UnknownJobType(_)));
        msg.job_type = "chat".into();
        assert_matches!(route(&msg), Err(JobError::UnknownJobType(_)));
    }
}
