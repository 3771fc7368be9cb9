//! Job status and control endpoints.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use pulse_core::job_events::{MSG_TYPE_JOB_STATUS, MSG_TYPE_STREAM_END, MSG_TYPE_STREAM_ERROR};
use pulse_core::types::JobId;
use pulse_events::JobSnapshot;
use serde::Serialize;
use serde_json::json;

use super::error::{ApiError, ApiResult};
use super::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new()
        .route("/jobs/{id}", get(get_job))
        .route("/jobs/{id}/stream", get(stream_job))
        .route("/jobs/{id}/cancel", post(cancel_job))
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// GET /jobs/{id} -- the job's current snapshot.
async fn get_job(State(state): State<ServerState>, Path(job_id): Path<JobId>) -> ApiResult<Json<JobSnapshot>> {
    let job = state.store.get(job_id).await?.ok_or(ApiError::NotFound(job_id))?;
    Ok(Json(JobSnapshot::from(&job)))
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct CancelResponse {
    pub job_id: JobId,
    /// Whether the job was running on this worker and has been signalled.
    pub cancelled: bool,
}

/// POST /jobs/{id}/cancel -- trip the job's cancellation flag.
///
/// Only reaches jobs running on this worker process. A job held by another
/// worker, or still waiting in the queue, is left alone and the response
/// carries `cancelled: false`.
async fn cancel_job(State(state): State<ServerState>, Path(job_id): Path<JobId>) -> Json<CancelResponse> {
    let cancelled = state.dispatcher.cancel_job(job_id);
    Json(CancelResponse { job_id, cancelled })
}

// ---------------------------------------------------------------------------
// Stream
// ---------------------------------------------------------------------------

/// GET /jobs/{id}/stream -- WebSocket of job snapshots.
///
/// Frames are JSON: `{"type": "job_status", "job": {...}}` for each
/// snapshot, then `{"type": "stream_end", "job_id": ...}` after the
/// terminal one. A job that cannot be subscribed to gets a single
/// `stream_error` frame.
async fn stream_job(
    ws: WebSocketUpgrade,
    State(state): State<ServerState>,
    Path(job_id): Path<JobId>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, job_id))
}

async fn handle_socket(socket: WebSocket, state: ServerState, job_id: JobId) {
    tracing::info!(job_id = %job_id, "Status stream connected");
    let (mut sink, mut inbound) = socket.split();

    let mut snapshots = match state.publisher.subscribe(job_id).await {
        Ok(snapshots) => snapshots,
        Err(e) => {
            tracing::debug!(job_id = %job_id, error = %e, "Status stream rejected");
            let frame = json!({
                "type": MSG_TYPE_STREAM_ERROR,
                "job_id": job_id,
                "error": e.to_string(),
            });
            let _ = sink.send(text(frame)).await;
            let _ = sink.send(Message::Close(None)).await;
            return;
        }
    };

    loop {
        tokio::select! {
            next = snapshots.next() => match next {
                Some(snapshot) => {
                    let frame = json!({ "type": MSG_TYPE_JOB_STATUS, "job": snapshot });
                    if sink.send(text(frame)).await.is_err() {
                        tracing::debug!(job_id = %job_id, "Status stream sink closed");
                        return;
                    }
                }
                None => break,
            },
            incoming = inbound.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => {
                    tracing::info!(job_id = %job_id, "Status stream closed by client");
                    return;
                }
                Some(Err(e)) => {
                    tracing::debug!(job_id = %job_id, error = %e, "Status stream receive error");
                    return;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    let frame = json!({ "type": MSG_TYPE_STREAM_END, "job_id": job_id });
    let _ = sink.send(text(frame)).await;
    let _ = sink.send(Message::Close(None)).await;
    tracing::info!(job_id = %job_id, "Status stream ended");
}

fn text(frame: serde_json::Value) -> Message {
    Message::Text(frame.to_string().into())
}
