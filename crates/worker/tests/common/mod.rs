#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use pulse_core::clock::ManualClock;
use pulse_core::message::{JobMessage, ProviderKind};
use pulse_core::retry::RetryPolicy;
use pulse_core::types::JobId;
use pulse_db::models::job::{Job, NewJob};
use pulse_db::store::{JobStore, MemoryJobStore};
use pulse_events::StatusPublisher;
use pulse_providers::{MockProvider, PollPolicy, ProviderPolicy, ProviderRegistry};
use pulse_storage::uploader::DEFAULT_URL_TTL;
use pulse_storage::{ArtifactUploader, MemoryObjectStore};
use pulse_worker::dispatcher::{Dispatcher, DispatcherConfig};
use pulse_worker::processor::JobProcessor;
use pulse_worker::queue::{JobQueue, MemoryQueue};
use pulse_worker::server::ServerState;
use tokio::task::JoinHandle;

pub const MOCK_SEED: u64 = 42;

/// Knobs for building a [`Harness`].
pub struct Options {
    /// Mock render time per second of video; `None` keeps the default
    /// seeded latency model.
    pub render_per_second: Option<Duration>,
    pub poll: PollPolicy,
    pub dispatcher: DispatcherConfig,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            render_per_second: Some(Duration::from_secs(1)),
            poll: PollPolicy {
                max_attempts: 60,
                interval: Duration::from_secs(1),
            },
            dispatcher: DispatcherConfig {
                wait_time: Duration::from_secs(1),
                visibility_timeout: Duration::from_secs(30),
                shutdown_grace: Duration::from_secs(5),
                backoff: RetryPolicy {
                    max_attempts: u32::MAX,
                    base_delay: Duration::from_millis(100),
                    max_delay: Duration::from_secs(1),
                    ..Default::default()
                }
                .without_jitter(),
                ..Default::default()
            },
        }
    }
}

/// A worker wired entirely to in-memory backends.
pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub store: Arc<MemoryJobStore>,
    pub objects: Arc<MemoryObjectStore>,
    pub queue: Arc<MemoryQueue>,
    pub publisher: Arc<StatusPublisher>,
    pub processor: Arc<JobProcessor>,
    pub dispatcher: Arc<Dispatcher>,
    pub provider_policy: ProviderPolicy,
}

pub fn harness(options: Options) -> Harness {
    harness_with_queue(options, Arc::new(MemoryQueue::new()), None)
}

/// Build a harness whose dispatcher reads from `queue_override` when given,
/// while tests keep direct access to the in-memory `queue`.
pub fn harness_with_queue(
    options: Options,
    queue: Arc<MemoryQueue>,
    queue_override: Option<Arc<dyn JobQueue>>,
) -> Harness {
    let clock = Arc::new(ManualClock::starting_now());
    let store = Arc::new(MemoryJobStore::new(clock.clone()));
    let objects = Arc::new(MemoryObjectStore::new("pulse-test", clock.clone()));
    let publisher = Arc::new(StatusPublisher::new(store.clone()));

    let provider_policy = ProviderPolicy {
        poll: options.poll,
        retry: RetryPolicy::none(),
    };
    let mut mock = MockProvider::new(MOCK_SEED, provider_policy.clone());
    if let Some(per_second) = options.render_per_second {
        mock = mock.with_latency(per_second, Duration::ZERO);
    }
    let mut providers = ProviderRegistry::new();
    providers.register(ProviderKind::Mock, Arc::new(mock));

    let uploader = ArtifactUploader::new(objects.clone(), DEFAULT_URL_TTL, RetryPolicy::none());
    let processor = Arc::new(JobProcessor::new(
        store.clone(),
        publisher.clone(),
        providers,
        uploader,
        RetryPolicy::none(),
    ));

    let dispatcher_queue = queue_override.unwrap_or_else(|| queue.clone() as Arc<dyn JobQueue>);
    let dispatcher = Arc::new(Dispatcher::new(dispatcher_queue, processor.clone(), options.dispatcher));

    Harness {
        clock,
        store,
        objects,
        queue,
        publisher,
        processor,
        dispatcher,
        provider_policy,
    }
}

impl Harness {
    /// Run the dispatcher in the background.
    pub fn start(&self) -> JoinHandle<()> {
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move { dispatcher.run().await })
    }

    /// Insert a pending video job with a subscription for its user and
    /// enqueue its message. Returns the message and the queue message id.
    pub async fn enqueue(&self, provider: &str, duration: u32) -> (JobMessage, String) {
        let msg = self.seed(provider, duration).await;
        let message_id = self.queue.send(msg.to_body());
        (msg, message_id)
    }

    /// Insert a pending video job and open its user's subscription.
    pub async fn seed(&self, provider: &str, duration: u32) -> JobMessage {
        let job = self
            .store
            .insert(NewJob {
                id: uuid::Uuid::new_v4(),
                user_id: uuid::Uuid::new_v4(),
                job_type: "video".into(),
                provider: provider.into(),
            })
            .await;
        let now = chrono::Utc::now();
        self.store
            .open_subscription(job.user_id, "pro", now, now + chrono::Duration::days(30))
            .await;
        JobMessage {
            job_id: job.id,
            user_id: job.user_id,
            job_type: "video".into(),
            provider: provider.into(),
            prompt: "a lighthouse in a storm".into(),
            duration,
            style: Some("cinematic".into()),
            parameters: None,
        }
    }

    pub async fn job(&self, job_id: JobId) -> Job {
        self.store.get(job_id).await.unwrap().expect("job row exists")
    }

    pub async fn wait_for_terminal(&self, job_id: JobId) -> Job {
        let store = self.store.clone();
        eventually("job to reach a terminal status", || {
            let store = store.clone();
            async move {
                store
                    .get(job_id)
                    .await
                    .unwrap()
                    .is_some_and(|job| job.status.is_terminal())
            }
        })
        .await;
        self.job(job_id).await
    }

    pub async fn wait_for_empty_queue(&self) {
        let queue = self.queue.clone();
        eventually("queue to drain", || {
            let queue = queue.clone();
            async move { queue.is_empty() }
        })
        .await;
    }

    pub fn server_state(&self) -> ServerState {
        ServerState {
            store: self.store.clone(),
            publisher: self.publisher.clone(),
            dispatcher: self.dispatcher.clone(),
        }
    }
}

/// Poll `check` every 100 ms until it holds; panics after 10 000 tries.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..10_000 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("timed out waiting for {what}");
}
