//! Repository for the `jobs` table.
//!
//! Uses the [`JobStatus`] enum for every status literal. Guarded updates
//! return the updated row, or `None` when the row was not in an eligible
//! status (already terminal, or missing).

use pulse_core::types::JobId;
use sqlx::{PgConnection, PgPool};

use crate::models::job::{Job, NewJob};
use crate::models::status::JobStatus;

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, user_id, job_type, provider, status, progress, \
    result_url, error_message, \
    created_at, started_at, completed_at, updated_at";

/// Provides guarded state transitions for generation jobs.
pub struct JobRepo;

impl JobRepo {
    /// Insert a new `pending` job. Owned by the request-serving API in
    /// production; used by tooling and tests here.
    pub async fn insert(pool: &PgPool, input: &NewJob) -> Result<Job, sqlx::Error> {
        let query = format!(
            "INSERT INTO jobs (id, user_id, job_type, provider, status) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(input.id)
            .bind(input.user_id)
            .bind(&input.job_type)
            .bind(&input.provider)
            .bind(JobStatus::Pending)
            .fetch_one(pool)
            .await
    }

    /// Find a job by its ID.
    pub async fn find_by_id(pool: &PgPool, id: JobId) -> Result<Option<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Move a `pending` (or re-delivered `processing`) job to `processing`.
    ///
    /// `started_at` is only set the first time.
    pub async fn begin_processing(pool: &PgPool, id: JobId) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs \
             SET status = $2, started_at = COALESCE(started_at, NOW()), updated_at = NOW() \
             WHERE id = $1 AND status IN ($3, $4) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .bind(JobStatus::Processing)
            .bind(JobStatus::Pending)
            .bind(JobStatus::Processing)
            .fetch_optional(pool)
            .await
    }

    /// Raise the progress percentage of a `processing` job. Progress never
    /// decreases.
    pub async fn update_progress(
        pool: &PgPool,
        id: JobId,
        percent: i16,
    ) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs \
             SET progress = GREATEST(progress, $2), updated_at = NOW() \
             WHERE id = $1 AND status = $3 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .bind(percent.clamp(0, 100))
            .bind(JobStatus::Processing)
            .fetch_optional(pool)
            .await
    }

    /// Mark a `processing` job completed with its signed artifact URL.
    ///
    /// Takes a connection so the caller can run it in the same transaction
    /// as the usage insert.
    pub async fn complete(
        conn: &mut PgConnection,
        id: JobId,
        result_url: &str,
    ) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs \
             SET status = $2, result_url = $3, error_message = NULL, progress = 100, \
                 completed_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND status = $4 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .bind(JobStatus::Completed)
            .bind(result_url)
            .bind(JobStatus::Processing)
            .fetch_optional(conn)
            .await
    }

    /// Mark a `processing` job failed with a user-visible message.
    pub async fn fail(pool: &PgPool, id: JobId, error: &str) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs \
             SET status = $2, error_message = $3, result_url = NULL, \
                 completed_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND status = $4 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .bind(JobStatus::Failed)
            .bind(error)
            .bind(JobStatus::Processing)
            .fetch_optional(pool)
            .await
    }
}
