//! Per-job status channels.
//!
//! Each subscribed job owns one `tokio::sync::watch` channel. Watch
//! channels keep only the latest value, so a slow subscriber skips
//! intermediate progress snapshots but always observes the newest one,
//! and the terminal snapshot is always the newest one.
//!
//! A channel exists only while it has subscribers: the stream returned by
//! [`StatusPublisher::subscribe`] removes its job's entry when the last
//! receiver is dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::stream::{self, BoxStream, StreamExt};
use pulse_core::types::JobId;
use pulse_db::models::job::Job;
use pulse_db::store::{JobStore, StoreError};
use tokio::sync::watch;

use crate::snapshot::JobSnapshot;

/// Stream of snapshots for one job. Ends after the terminal snapshot.
pub type SnapshotStream = BoxStream<'static, JobSnapshot>;

type Channels = Arc<Mutex<HashMap<JobId, watch::Sender<Option<JobSnapshot>>>>>;

#[derive(Debug, thiserror::Error)]
pub enum SubscribeError {
    #[error("job {0} not found")]
    NotFound(JobId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// StatusPublisher
// ---------------------------------------------------------------------------

/// Fans job state changes out to live subscribers.
///
/// Shared via `Arc<StatusPublisher>` between the job processor (which
/// publishes) and the status server (which subscribes).
pub struct StatusPublisher {
    store: Arc<dyn JobStore>,
    channels: Channels,
}

impl StatusPublisher {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Push the job's current state to its subscribers, if it has any.
    pub fn publish(&self, job: &Job) {
        let channels = lock(&self.channels);
        if let Some(tx) = channels.get(&job.id) {
            tx.send_replace(Some(JobSnapshot::from(job)));
            tracing::debug!(
                job_id = %job.id,
                status = %job.status,
                progress = job.progress,
                subscribers = tx.receiver_count(),
                "Published job status",
            );
        }
    }

    /// Subscribe to a job's status.
    ///
    /// A job that is already terminal yields exactly one snapshot. Otherwise
    /// the stream yields the current snapshot, then live snapshots, and ends
    /// once a terminal snapshot has been yielded.
    pub async fn subscribe(&self, job_id: JobId) -> Result<SnapshotStream, SubscribeError> {
        // Register before reading the store so no publish between the read
        // and the registration is lost.
        let rx = {
            let mut channels = lock(&self.channels);
            channels
                .entry(job_id)
                .or_insert_with(|| watch::channel(None).0)
                .subscribe()
        };
        let live = Live {
            rx,
            store: Arc::clone(&self.store),
            last: None,
            job_id,
            _guard: ChannelGuard {
                channels: Arc::clone(&self.channels),
                job_id,
            },
        };

        let job = self
            .store
            .get(job_id)
            .await?
            .ok_or(SubscribeError::NotFound(job_id))?;
        let first = JobSnapshot::from(&job);

        let state = if first.is_terminal() {
            drop(live);
            State::Start { first, live: None }
        } else {
            State::Start {
                first,
                live: Some(live),
            }
        };

        Ok(stream::unfold(state, State::step).boxed())
    }

    /// Number of jobs that currently have at least one subscriber.
    pub fn active_channels(&self) -> usize {
        lock(&self.channels).len()
    }

    /// Drop every channel. Open streams re-read the store once and end.
    pub fn close_all(&self) {
        let closed = std::mem::take(&mut *lock(&self.channels));
        if !closed.is_empty() {
            tracing::info!(count = closed.len(), "Closed job status channels");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ---------------------------------------------------------------------------
// Stream state
// ---------------------------------------------------------------------------

enum State {
    Start {
        first: JobSnapshot,
        live: Option<Live>,
    },
    Live(Live),
    Done,
}

impl State {
    async fn step(self) -> Option<(JobSnapshot, State)> {
        match self {
            State::Start { first, live } => {
                let next = match live {
                    Some(mut live) if !first.is_terminal() => {
                        live.last = Some(first.clone());
                        State::Live(live)
                    }
                    _ => State::Done,
                };
                Some((first, next))
            }
            State::Live(live) => live.next().await,
            State::Done => None,
        }
    }
}

struct Live {
    // Dropped before `_guard`, so the guard sees the updated receiver count.
    rx: watch::Receiver<Option<JobSnapshot>>,
    store: Arc<dyn JobStore>,
    last: Option<JobSnapshot>,
    job_id: JobId,
    _guard: ChannelGuard,
}

impl Live {
    async fn next(mut self) -> Option<(JobSnapshot, State)> {
        loop {
            if self.rx.changed().await.is_err() {
                return self.settle().await;
            }
            let current = self.rx.borrow_and_update().clone();
            let Some(snapshot) = current else {
                continue;
            };
            if self.last.as_ref() == Some(&snapshot) {
                continue;
            }
            return Some(self.emit(snapshot));
        }
    }

    fn emit(mut self, snapshot: JobSnapshot) -> (JobSnapshot, State) {
        if snapshot.is_terminal() {
            return (snapshot, State::Done);
        }
        self.last = Some(snapshot.clone());
        (snapshot, State::Live(self))
    }

    /// The channel closed before a terminal snapshot was seen. Re-read the
    /// store so a terminal state is never missed.
    async fn settle(self) -> Option<(JobSnapshot, State)> {
        match self.store.get(self.job_id).await {
            Ok(Some(job)) if job.status.is_terminal() => {
                Some((JobSnapshot::from(&job), State::Done))
            }
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(job_id = %self.job_id, error = %e, "Failed to re-read job after channel close");
                None
            }
        }
    }
}

/// Removes the job's channel once its last receiver is gone.
struct ChannelGuard {
    channels: Channels,
    job_id: JobId,
}

impl Drop for ChannelGuard {
    fn drop(&mut self) {
        let mut channels = lock(&self.channels);
        if channels
            .get(&self.job_id)
            .is_some_and(|tx| tx.receiver_count() == 0)
        {
            channels.remove(&self.job_id);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
