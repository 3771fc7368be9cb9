//! Postgres-backed job store tests.
//!
//! These need a live database (`DATABASE_URL`), so they are ignored by
//! default. Run with `cargo test -p pulse-db -- --ignored`.

use assert_matches::assert_matches;
use pulse_core::usage::{UsageFeature, UsageMetrics};
use pulse_db::models::job::{Job, NewJob};
use pulse_db::models::status::JobStatus;
use pulse_db::models::usage::UsageRecord;
use pulse_db::repositories::JobRepo;
use pulse_db::store::{JobStore, PgJobStore, Transition};
use sqlx::PgPool;

async fn seed_job(pool: &PgPool) -> Job {
    let input = NewJob {
        id: uuid::Uuid::new_v4(),
        user_id: uuid::Uuid::new_v4(),
        job_type: "video".into(),
        provider: "mock".into(),
    };
    JobRepo::insert(pool, &input).await.unwrap()
}

async fn seed_subscription(pool: &PgPool, user_id: uuid::Uuid) {
    sqlx::query(
        "INSERT INTO subscriptions (user_id, plan, period_start, period_end) \
         VALUES ($1, 'plus', NOW(), NOW() + INTERVAL '30 days')",
    )
    .bind(user_id)
    .execute(pool)
    .await
    .unwrap();
}

fn usage_for(job: &Job, seconds: u32) -> UsageRecord {
    UsageRecord {
        job_id: job.id,
        user_id: job.user_id,
        feature: UsageFeature::VideoGeneration,
        metrics: UsageMetrics::video(seconds),
        metadata: serde_json::json!({"provider": "mock", "duration": seconds}),
    }
}

// ---------------------------------------------------------------------------
// Test: full lifecycle charges the subscription once
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn completion_records_usage_and_counters(pool: PgPool) {
    let job = seed_job(&pool).await;
    seed_subscription(&pool, job.user_id).await;
    let store = PgJobStore::new(pool);

    let started = store.begin_processing(job.id).await.unwrap();
    assert_matches!(&started, Transition::Applied(j) if j.status == JobStatus::Processing);
    assert!(started.job().unwrap().started_at.is_some());

    store.record_progress(job.id, 60).await.unwrap();
    let done = store
        .complete(job.id, "https://signed.example/video.mp4", &usage_for(&job, 4))
        .await
        .unwrap();
    let done = done.job().unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.progress, 100);
    assert!(done.completed_at.is_some());

    let events = store.usage_events(job.id).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, "video_generation");
    assert_eq!(events[0].video_seconds, 4);

    let counters = store.usage_counters(job.user_id).await.unwrap().unwrap();
    assert_eq!(counters.videos_generated, 1);
    assert_eq!(counters.video_seconds_used, 4);
}

// ---------------------------------------------------------------------------
// Test: replayed completion is skipped and never double-charges
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn replayed_completion_is_idempotent(pool: PgPool) {
    let job = seed_job(&pool).await;
    seed_subscription(&pool, job.user_id).await;
    let store = PgJobStore::new(pool);

    store.begin_processing(job.id).await.unwrap();
    let usage = usage_for(&job, 4);
    assert!(store.complete(job.id, "https://a", &usage).await.unwrap().is_applied());

    let replay = store.complete(job.id, "https://b", &usage).await.unwrap();
    assert_matches!(replay, Transition::Skipped(j) if j.result_url.as_deref() == Some("https://a"));

    assert_eq!(store.usage_events(job.id).await.unwrap().len(), 1);
    let counters = store.usage_counters(job.user_id).await.unwrap().unwrap();
    assert_eq!(counters.videos_generated, 1);
}

// ---------------------------------------------------------------------------
// Test: terminal rows reject every further write
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn failed_job_is_frozen(pool: PgPool) {
    let job = seed_job(&pool).await;
    let store = PgJobStore::new(pool);

    store.begin_processing(job.id).await.unwrap();
    let failed = store.fail(job.id, "provider error: boom").await.unwrap();
    let frozen = failed.job().unwrap().clone();
    assert_eq!(frozen.status, JobStatus::Failed);
    assert!(frozen.result_url.is_none());

    assert_matches!(store.begin_processing(job.id).await.unwrap(), Transition::Skipped(_));
    assert_matches!(store.record_progress(job.id, 90).await.unwrap(), Transition::Skipped(_));
    assert_matches!(
        store.complete(job.id, "https://late", &usage_for(&job, 4)).await.unwrap(),
        Transition::Skipped(_)
    );

    assert_eq!(store.get(job.id).await.unwrap().unwrap(), frozen);
    assert!(store.usage_events(job.id).await.unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Test: only a processing row can fail
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn pending_job_cannot_fail(pool: PgPool) {
    let job = seed_job(&pool).await;
    let store = PgJobStore::new(pool);

    assert_matches!(store.fail(job.id, "provider error: boom").await.unwrap(), Transition::Skipped(_));

    let row = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(row.status, JobStatus::Pending);
    assert!(row.error_message.is_none());
}

// ---------------------------------------------------------------------------
// Test: progress never decreases
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn progress_only_rises(pool: PgPool) {
    let job = seed_job(&pool).await;
    let store = PgJobStore::new(pool);
    store.begin_processing(job.id).await.unwrap();

    store.record_progress(job.id, 70).await.unwrap();
    let lowered = store.record_progress(job.id, 30).await.unwrap();
    assert_eq!(lowered.job().unwrap().progress, 70);
}

// ---------------------------------------------------------------------------
// Test: usage without a subscription row still records the event
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn completion_without_subscription_records_event_only(pool: PgPool) {
    let job = seed_job(&pool).await;
    let store = PgJobStore::new(pool);

    store.begin_processing(job.id).await.unwrap();
    store.complete(job.id, "https://a", &usage_for(&job, 2)).await.unwrap();

    assert_eq!(store.usage_events(job.id).await.unwrap().len(), 1);
    assert!(store.usage_counters(job.user_id).await.unwrap().is_none());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn unknown_job_is_missing(pool: PgPool) {
    let store = PgJobStore::new(pool);
    let id = uuid::Uuid::new_v4();
    assert_matches!(store.begin_processing(id).await.unwrap(), Transition::Missing);
    assert!(store.get(id).await.unwrap().is_none());
}
