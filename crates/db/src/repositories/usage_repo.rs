//! Repository for the usage ledger (`usage_events` + `subscriptions`).

use pulse_core::types::{JobId, UserId};
use sqlx::{PgConnection, PgPool};

use crate::models::usage::{UsageCounters, UsageEvent, UsageRecord};

const EVENT_COLUMNS: &str = "\
    id, user_id, job_id, event_type, tokens, images, videos, video_seconds, \
    slides, cvs, metadata, created_at";

const COUNTER_COLUMNS: &str = "\
    user_id, plan, tokens_used, images_generated, videos_generated, \
    video_seconds_used, slides_generated, cvs_generated, \
    period_start, period_end, updated_at";

pub struct UsageRepo;

impl UsageRepo {
    /// Insert the usage event for a job and bump the user's counters.
    ///
    /// Idempotent on `job_id`: a second call inserts nothing, touches no
    /// counter and returns `false`. Must run inside the transaction that
    /// completes the job.
    pub async fn record(conn: &mut PgConnection, usage: &UsageRecord) -> Result<bool, sqlx::Error> {
        let m = &usage.metrics;
        let inserted = sqlx::query(
            "INSERT INTO usage_events \
                 (user_id, job_id, event_type, tokens, images, videos, video_seconds, slides, cvs, metadata) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (job_id) DO NOTHING",
        )
        .bind(usage.user_id)
        .bind(usage.job_id)
        .bind(usage.feature.event_type())
        .bind(m.tokens.max(0))
        .bind(m.images.max(0))
        .bind(m.videos.max(0))
        .bind(m.video_seconds.max(0))
        .bind(m.slides.max(0))
        .bind(m.cvs.max(0))
        .bind(&usage.metadata)
        .execute(&mut *conn)
        .await?
        .rows_affected()
            == 1;

        if !inserted {
            tracing::info!(job_id = %usage.job_id, "Usage already recorded, skipping counters");
            return Ok(false);
        }

        let counters = sqlx::query(
            "UPDATE subscriptions \
             SET tokens_used = tokens_used + $2, \
                 images_generated = images_generated + $3, \
                 videos_generated = videos_generated + $4, \
                 video_seconds_used = video_seconds_used + $5, \
                 slides_generated = slides_generated + $6, \
                 cvs_generated = cvs_generated + $7, \
                 updated_at = NOW() \
             WHERE user_id = $1",
        )
        .bind(usage.user_id)
        .bind(m.tokens.max(0))
        .bind(m.images.max(0))
        .bind(m.videos.max(0))
        .bind(m.video_seconds.max(0))
        .bind(m.slides.max(0))
        .bind(m.cvs.max(0))
        .execute(&mut *conn)
        .await?;

        if counters.rows_affected() == 0 {
            tracing::warn!(
                user_id = %usage.user_id,
                job_id = %usage.job_id,
                "No subscription row for user, usage event recorded without counters",
            );
        }
        Ok(true)
    }

    /// All usage events recorded for a job (at most one).
    pub async fn events_for_job(pool: &PgPool, job_id: JobId) -> Result<Vec<UsageEvent>, sqlx::Error> {
        let query = format!("SELECT {EVENT_COLUMNS} FROM usage_events WHERE job_id = $1");
        sqlx::query_as::<_, UsageEvent>(&query)
            .bind(job_id)
            .fetch_all(pool)
            .await
    }

    /// Current counters for a user, if they have a subscription row.
    pub async fn counters(pool: &PgPool, user_id: UserId) -> Result<Option<UsageCounters>, sqlx::Error> {
        let query = format!("SELECT {COUNTER_COLUMNS} FROM subscriptions WHERE user_id = $1");
        sqlx::query_as::<_, UsageCounters>(&query)
            .bind(user_id)
            .fetch_optional(pool)
            .await
    }
}
