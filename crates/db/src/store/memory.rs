use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use pulse_core::clock::{Clock, SystemClock};
use pulse_core::types::{JobId, Timestamp, UserId};
use tokio::sync::Mutex;

use super::{validate_error_message, validate_result_url, JobStore, StoreError, Transition};
use crate::models::job::{Job, NewJob};
use crate::models::status::JobStatus;
use crate::models::usage::{UsageCounters, UsageEvent, UsageRecord};

/// In-process [`JobStore`] with the same guarded transitions as
/// [`PgJobStore`](super::PgJobStore).
///
/// A single mutex covers jobs, usage events and counters, so `complete`
/// is atomic in the same sense as the Postgres transaction.
pub struct MemoryJobStore {
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    jobs: HashMap<JobId, Job>,
    usage_events: Vec<UsageEvent>,
    counters: HashMap<UserId, UsageCounters>,
}

impl MemoryJobStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(State::default()),
        }
    }

    /// Insert a `pending` job, as the request-serving API would.
    pub async fn insert(&self, input: NewJob) -> Job {
        let now = self.clock.now();
        let job = Job {
            id: input.id,
            user_id: input.user_id,
            job_type: input.job_type,
            provider: input.provider,
            status: JobStatus::Pending,
            progress: 0,
            result_url: None,
            error_message: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        };
        self.state.lock().await.jobs.insert(job.id, job.clone());
        job
    }

    /// Open a subscription row with zeroed counters for the given period.
    pub async fn open_subscription(
        &self,
        user_id: UserId,
        plan: &str,
        period_start: Timestamp,
        period_end: Timestamp,
    ) {
        let counters = UsageCounters {
            user_id,
            plan: plan.to_string(),
            tokens_used: 0,
            images_generated: 0,
            videos_generated: 0,
            video_seconds_used: 0,
            slides_generated: 0,
            cvs_generated: 0,
            period_start,
            period_end,
            updated_at: self.clock.now(),
        };
        self.state.lock().await.counters.insert(user_id, counters);
    }

    /// Apply `write` to the job if its current status may move to `next`.
    async fn transition<F>(&self, job_id: JobId, next: JobStatus, write: F) -> Transition
    where
        F: FnOnce(&mut Job, Timestamp),
    {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let Some(job) = state.jobs.get_mut(&job_id) else {
            return Transition::Missing;
        };
        if !job.status.can_transition_to(next) {
            return Transition::Skipped(job.clone());
        }
        job.status = next;
        job.updated_at = now;
        write(job, now);
        Transition::Applied(job.clone())
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn get(&self, job_id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.state.lock().await.jobs.get(&job_id).cloned())
    }

    async fn begin_processing(&self, job_id: JobId) -> Result<Transition, StoreError> {
        Ok(self
            .transition(job_id, JobStatus::Processing, |job, now| {
                job.started_at.get_or_insert(now);
            })
            .await)
    }

    async fn record_progress(&self, job_id: JobId, percent: u8) -> Result<Transition, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let Some(job) = state.jobs.get_mut(&job_id) else {
            return Ok(Transition::Missing);
        };
        if job.status != JobStatus::Processing {
            return Ok(Transition::Skipped(job.clone()));
        }
        job.progress = job.progress.max(i16::from(percent.min(100)));
        job.updated_at = now;
        Ok(Transition::Applied(job.clone()))
    }

    async fn complete(
        &self,
        job_id: JobId,
        result_url: &str,
        usage: &UsageRecord,
    ) -> Result<Transition, StoreError> {
        validate_result_url(result_url)?;

        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let State {
            jobs,
            usage_events,
            counters,
        } = &mut *state;

        let Some(job) = jobs.get_mut(&job_id) else {
            return Ok(Transition::Missing);
        };
        if job.status != JobStatus::Processing {
            return Ok(Transition::Skipped(job.clone()));
        }

        job.status = JobStatus::Completed;
        job.result_url = Some(result_url.to_string());
        job.error_message = None;
        job.progress = 100;
        job.completed_at = Some(now);
        job.updated_at = now;

        if usage_events.iter().any(|e| e.job_id == usage.job_id) {
            tracing::info!(job_id = %usage.job_id, "Usage already recorded, skipping counters");
        } else {
            let m = &usage.metrics;
            usage_events.push(UsageEvent {
                id: uuid::Uuid::new_v4(),
                user_id: usage.user_id,
                job_id: usage.job_id,
                event_type: usage.feature.event_type().to_string(),
                tokens: m.tokens.max(0),
                images: m.images.max(0),
                videos: m.videos.max(0),
                video_seconds: m.video_seconds.max(0),
                slides: m.slides.max(0),
                cvs: m.cvs.max(0),
                metadata: usage.metadata.clone(),
                created_at: now,
            });
            match counters.get_mut(&usage.user_id) {
                Some(c) => {
                    c.apply(m);
                    c.updated_at = now;
                }
                None => tracing::warn!(
                    user_id = %usage.user_id,
                    job_id = %usage.job_id,
                    "No subscription row for user, usage event recorded without counters",
                ),
            }
        }

        Ok(Transition::Applied(job.clone()))
    }

    async fn fail(&self, job_id: JobId, error_message: &str) -> Result<Transition, StoreError> {
        validate_error_message(error_message)?;
        Ok(self
            .transition(job_id, JobStatus::Failed, |job, now| {
                job.error_message = Some(error_message.to_string());
                job.result_url = None;
                job.completed_at = Some(now);
            })
            .await)
    }

    async fn usage_events(&self, job_id: JobId) -> Result<Vec<UsageEvent>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .usage_events
            .iter()
            .filter(|e| e.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn usage_counters(&self, user_id: UserId) -> Result<Option<UsageCounters>, StoreError> {
        Ok(self.state.lock().await.counters.get(&user_id).cloned())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
