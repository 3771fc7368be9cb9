use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use super::ServerState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Whether the job store is reachable.
    pub db_healthy: bool,
    /// Whether the dispatcher is still accepting work.
    pub accepting_jobs: bool,
}

/// GET /health -- returns service and job store health.
async fn health_check(State(state): State<ServerState>) -> Json<HealthResponse> {
    let db_healthy = state.store.health_check().await.is_ok();
    let accepting_jobs = !state.dispatcher.is_stopping();

    let status = if db_healthy && accepting_jobs { "ok" } else { "degraded" };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        db_healthy,
        accepting_jobs,
    })
}

pub fn router() -> Router<ServerState> {
    Router::new().route("/health", get(health_check))
}
