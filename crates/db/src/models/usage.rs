//! Usage ledger models.

use pulse_core::types::{JobId, Timestamp, UserId};
use pulse_core::usage::{UsageFeature, UsageMetrics};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the append-only `usage_events` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct UsageEvent {
    pub id: uuid::Uuid,
    pub user_id: UserId,
    pub job_id: JobId,
    pub event_type: String,
    pub tokens: i64,
    pub images: i32,
    pub videos: i32,
    pub video_seconds: i32,
    pub slides: i32,
    pub cvs: i32,
    pub metadata: serde_json::Value,
    pub created_at: Timestamp,
}

/// Quota counters for one user's current billing period
/// (columns of the `subscriptions` table).
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct UsageCounters {
    pub user_id: UserId,
    pub plan: String,
    pub tokens_used: i64,
    pub images_generated: i32,
    pub videos_generated: i32,
    pub video_seconds_used: i32,
    pub slides_generated: i32,
    pub cvs_generated: i32,
    pub period_start: Timestamp,
    pub period_end: Timestamp,
    pub updated_at: Timestamp,
}

impl UsageCounters {
    /// Add `metrics` to the counters. Counters only ever grow here.
    pub fn apply(&mut self, metrics: &UsageMetrics) {
        self.tokens_used += metrics.tokens.max(0);
        self.images_generated += metrics.images.max(0);
        self.videos_generated += metrics.videos.max(0);
        self.video_seconds_used += metrics.video_seconds.max(0);
        self.slides_generated += metrics.slides.max(0);
        self.cvs_generated += metrics.cvs.max(0);
    }
}

/// What the worker charges for one completed job.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageRecord {
    pub job_id: JobId,
    pub user_id: UserId,
    pub feature: UsageFeature,
    pub metrics: UsageMetrics,
    /// Audit context (provider, duration, style).
    pub metadata: serde_json::Value,
}
