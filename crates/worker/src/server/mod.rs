//! HTTP surface of the worker: health, job snapshots, live status streams
//! and cancellation.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderName, StatusCode};
use axum::Router;
use pulse_db::store::JobStore;
use pulse_events::StatusPublisher;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::dispatcher::Dispatcher;

pub mod error;
pub mod health;
pub mod jobs;

/// Timeout for plain HTTP requests. Upgraded WebSockets are not affected.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared state available to all handlers via `State<ServerState>`.
#[derive(Clone)]
pub struct ServerState {
    pub store: Arc<dyn JobStore>,
    pub publisher: Arc<StatusPublisher>,
    pub dispatcher: Arc<Dispatcher>,
}

/// Build the router with the full middleware stack.
pub fn router(state: ServerState) -> Router {
    let request_id_header = HeaderName::from_static("x-request-id");

    Router::new()
        .merge(health::router())
        .merge(jobs::router())
        // -- Middleware stack (applied bottom-up) --
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            REQUEST_TIMEOUT,
        ))
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .with_state(state)
}
