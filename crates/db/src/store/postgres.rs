use async_trait::async_trait;
use pulse_core::types::{JobId, UserId};

use super::{validate_error_message, validate_result_url, JobStore, StoreError, Transition};
use crate::models::job::Job;
use crate::models::usage::{UsageCounters, UsageEvent, UsageRecord};
use crate::repositories::{JobRepo, UsageRepo};
use crate::DbPool;

/// [`JobStore`] backed by Postgres.
#[derive(Clone)]
pub struct PgJobStore {
    pool: DbPool,
}

impl PgJobStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Turn a guarded-update result into a [`Transition`], re-reading the
    /// row when the guard did not match.
    async fn settle(&self, job_id: JobId, updated: Option<Job>) -> Result<Transition, StoreError> {
        if let Some(job) = updated {
            return Ok(Transition::Applied(job));
        }
        Ok(match JobRepo::find_by_id(&self.pool, job_id).await? {
            Some(job) => Transition::Skipped(job),
            None => Transition::Missing,
        })
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn get(&self, job_id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(JobRepo::find_by_id(&self.pool, job_id).await?)
    }

    async fn begin_processing(&self, job_id: JobId) -> Result<Transition, StoreError> {
        let updated = JobRepo::begin_processing(&self.pool, job_id).await?;
        self.settle(job_id, updated).await
    }

    async fn record_progress(&self, job_id: JobId, percent: u8) -> Result<Transition, StoreError> {
        let updated = JobRepo::update_progress(&self.pool, job_id, i16::from(percent)).await?;
        self.settle(job_id, updated).await
    }

    async fn complete(
        &self,
        job_id: JobId,
        result_url: &str,
        usage: &UsageRecord,
    ) -> Result<Transition, StoreError> {
        validate_result_url(result_url)?;

        let mut tx = self.pool.begin().await?;
        let Some(job) = JobRepo::complete(&mut *tx, job_id, result_url).await? else {
            tx.rollback().await?;
            return self.settle(job_id, None).await;
        };
        UsageRepo::record(&mut *tx, usage).await?;
        tx.commit().await?;

        Ok(Transition::Applied(job))
    }

    async fn fail(&self, job_id: JobId, error_message: &str) -> Result<Transition, StoreError> {
        validate_error_message(error_message)?;
        let updated = JobRepo::fail(&self.pool, job_id, error_message).await?;
        self.settle(job_id, updated).await
    }

    async fn usage_events(&self, job_id: JobId) -> Result<Vec<UsageEvent>, StoreError> {
        Ok(UsageRepo::events_for_job(&self.pool, job_id).await?)
    }

    async fn usage_counters(&self, user_id: UserId) -> Result<Option<UsageCounters>, StoreError> {
        Ok(UsageRepo::counters(&self.pool, user_id).await?)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(crate::health_check(&self.pool).await?)
    }
}
