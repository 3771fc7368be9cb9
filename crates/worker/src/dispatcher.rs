//! The queue receive loop.
//!
//! The dispatcher owns message acknowledgement. [`JobProcessor`] decides
//! what happened to the job; the dispatcher maps that onto the queue:
//!
//! - `Ok(_)` (completed, failed, or already terminal) → delete the message.
//! - unroutable (malformed, unknown type, missing row) → leave it, and
//!   dead-letter it once its receive count reaches `max_receive_count`.
//! - abandoned at shutdown → make it visible again at once.
//! - anything else (store down) → leave it for redelivery after the
//!   visibility timeout.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use pulse_core::error::JobError;
use pulse_core::message::JobMessage;
use pulse_core::retry::RetryPolicy;
use pulse_core::types::JobId;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::processor::{JobControl, JobProcessor};
use crate::queue::{JobQueue, ReceiveOptions, ReceivedMessage};

/// Floor for the visibility heartbeat period.
const MIN_HEARTBEAT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq)]
pub struct DispatcherConfig {
    /// Jobs processed concurrently by this worker.
    pub max_in_flight: usize,
    /// Queue long-poll duration.
    pub wait_time: Duration,
    pub visibility_timeout: Duration,
    /// Extend visibility every `visibility_timeout / 2` while a job runs.
    pub visibility_heartbeat: bool,
    /// Receives after which an unroutable message is dead-lettered.
    pub max_receive_count: u32,
    /// Time in-flight jobs get to finish after [`Dispatcher::stop`].
    pub shutdown_grace: Duration,
    /// Backoff between failed receive calls. Only the delays are used; the
    /// loop never gives up.
    pub backoff: RetryPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 1,
            wait_time: Duration::from_secs(20),
            visibility_timeout: Duration::from_secs(300),
            visibility_heartbeat: true,
            max_receive_count: 5,
            shutdown_grace: Duration::from_secs(30),
            backoff: RetryPolicy {
                max_attempts: u32::MAX,
                base_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(60),
                ..Default::default()
            },
        }
    }
}

pub struct Dispatcher {
    inner: Arc<Inner>,
    stopping: CancellationToken,
    tracker: TaskTracker,
    slots: Arc<Semaphore>,
}

struct Inner {
    queue: Arc<dyn JobQueue>,
    processor: Arc<JobProcessor>,
    config: DispatcherConfig,
    /// Fired when the shutdown grace period runs out.
    abandon: CancellationToken,
    in_flight: Mutex<HashMap<JobId, JobControl>>,
}

impl Dispatcher {
    pub fn new(queue: Arc<dyn JobQueue>, processor: Arc<JobProcessor>, config: DispatcherConfig) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
        Self {
            inner: Arc::new(Inner {
                queue,
                processor,
                config,
                abandon: CancellationToken::new(),
                in_flight: Mutex::new(HashMap::new()),
            }),
            stopping: CancellationToken::new(),
            tracker: TaskTracker::new(),
            slots,
        }
    }

    /// Receive and process messages until [`stop`](Self::stop) is called,
    /// then drain in-flight jobs.
    pub async fn run(&self) {
        let config = &self.inner.config;
        let options = ReceiveOptions {
            max_messages: 1,
            wait_time: config.wait_time,
            visibility_timeout: config.visibility_timeout,
        };
        tracing::info!(
            max_in_flight = config.max_in_flight,
            visibility_timeout_secs = config.visibility_timeout.as_secs(),
            "Dispatcher started",
        );

        let mut failures: u32 = 0;
        loop {
            let permit = tokio::select! {
                biased;
                _ = self.stopping.cancelled() => break,
                permit = self.slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let received = tokio::select! {
                biased;
                _ = self.stopping.cancelled() => break,
                received = self.inner.queue.receive(&options) => received,
            };

            match received {
                Ok(messages) => {
                    failures = 0;
                    let mut permit = Some(permit);
                    for message in messages {
                        let slot = match permit.take() {
                            Some(slot) => slot,
                            None => match self.slots.clone().acquire_owned().await {
                                Ok(slot) => slot,
                                Err(_) => break,
                            },
                        };
                        let inner = Arc::clone(&self.inner);
                        self.tracker.spawn(async move {
                            inner.handle(message).await;
                            drop(slot);
                        });
                    }
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let delay = config.backoff.delay_for(failures);
                    tracing::warn!(
                        error = %e,
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        "Queue receive failed, backing off",
                    );
                    tokio::select! {
                        _ = self.stopping.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        self.drain().await;
    }

    /// Stop receiving. [`run`](Self::run) returns once in-flight jobs have
    /// finished or been abandoned.
    pub fn stop(&self) {
        if !self.stopping.is_cancelled() {
            tracing::info!("Dispatcher stop requested");
        }
        self.stopping.cancel();
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.is_cancelled()
    }

    /// Trip the cancellation flag of a job running on this worker.
    /// Returns `false` if the job is not in flight here.
    pub fn cancel_job(&self, job_id: JobId) -> bool {
        match self.inner.in_flight().get(&job_id) {
            Some(control) => {
                control.cancel();
                tracing::info!(job_id = %job_id, "Job cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Jobs currently running on this worker.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight().len()
    }

    // ---- private helpers ----

    async fn drain(&self) {
        self.tracker.close();
        let grace = self.inner.config.shutdown_grace;
        tracing::info!(
            in_flight = self.tracker.len(),
            grace_secs = grace.as_secs(),
            "Dispatcher draining",
        );

        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            tracing::warn!(
                in_flight = self.tracker.len(),
                "Shutdown grace elapsed, abandoning in-flight jobs",
            );
            self.inner.abandon.cancel();
            self.tracker.wait().await;
        }
        tracing::info!("Dispatcher stopped");
    }
}

impl Inner {
    async fn handle(&self, message: ReceivedMessage) {
        let job = match parse(&message) {
            Ok(job) => job,
            Err(e) => return self.unroutable(&message, &e).await,
        };
        let job_id = job.job_id;

        let Some(control) = self.claim(job_id) else {
            tracing::info!(
                job_id = %job_id,
                message_id = %message.message_id,
                "Job already in flight on this worker, leaving message",
            );
            return;
        };

        let result = tokio::select! {
            result = self.processor.process(&job, &control) => result,
            never = self.keep_visible(&message.receipt_handle) => match never {},
        };
        self.release(job_id);

        match result {
            Ok(outcome) => {
                tracing::info!(
                    job_id = %job_id,
                    status = %outcome.job().status,
                    "Acknowledging message",
                );
                if let Err(e) = self.queue.delete(&message.receipt_handle).await {
                    tracing::warn!(job_id = %job_id, error = %e, "Failed to acknowledge message");
                }
            }
            Err(e) if e.is_unroutable() => self.unroutable(&message, &e).await,
            Err(JobError::Abandoned) => {
                tracing::info!(job_id = %job_id, "Job abandoned, releasing message for redelivery");
                if let Err(e) = self.queue.extend_visibility(&message.receipt_handle, Duration::ZERO).await {
                    tracing::warn!(job_id = %job_id, error = %e, "Failed to release message");
                }
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Job interrupted, leaving message for redelivery");
            }
        }
    }

    /// Leave an unroutable message for redelivery, or dead-letter it once
    /// it has been received `max_receive_count` times.
    async fn unroutable(&self, message: &ReceivedMessage, error: &JobError) {
        let max = self.config.max_receive_count;
        if message.receive_count < max {
            tracing::warn!(
                message_id = %message.message_id,
                receive_count = message.receive_count,
                max_receive_count = max,
                error = %error,
                "Unroutable message, leaving for redelivery",
            );
            return;
        }

        match self.queue.dead_letter(message, &error.to_string()).await {
            Ok(()) => tracing::warn!(
                message_id = %message.message_id,
                receive_count = message.receive_count,
                error = %error,
                "Unroutable message dead-lettered",
            ),
            Err(e) => tracing::error!(
                message_id = %message.message_id,
                error = %e,
                "Failed to dead-letter message",
            ),
        }
    }

    /// Extend the message's visibility periodically. Never returns.
    async fn keep_visible(&self, receipt_handle: &str) -> Infallible {
        if !self.config.visibility_heartbeat {
            return std::future::pending().await;
        }
        let timeout = self.config.visibility_timeout;
        let period = (timeout / 2).max(MIN_HEARTBEAT);
        loop {
            tokio::time::sleep(period).await;
            match self.queue.extend_visibility(receipt_handle, timeout).await {
                Ok(()) => tracing::debug!(timeout_secs = timeout.as_secs(), "Message visibility extended"),
                Err(e) => tracing::warn!(error = %e, "Failed to extend message visibility"),
            }
        }
    }

    fn claim(&self, job_id: JobId) -> Option<JobControl> {
        let mut in_flight = self.in_flight();
        if in_flight.contains_key(&job_id) {
            return None;
        }
        let control = JobControl::new(&self.abandon);
        in_flight.insert(job_id, control.clone());
        Some(control)
    }

    fn release(&self, job_id: JobId) {
        self.in_flight().remove(&job_id);
    }

    fn in_flight(&self) -> MutexGuard<'_, HashMap<JobId, JobControl>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn parse(message: &ReceivedMessage) -> Result<JobMessage, JobError> {
    let body = message
        .body
        .as_deref()
        .ok_or_else(|| JobError::Malformed("missing body".into()))?;
    JobMessage::parse(body).map_err(|e| JobError::Malformed(e.to_string()))
}
