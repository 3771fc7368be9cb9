//! Status server endpoints over real sockets and in-process requests.

mod common;

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{harness, Harness, Options};
use futures::StreamExt;
use http_body_util::BodyExt;
use pulse_providers::PollPolicy;
use pulse_worker::server::{self, ServerState};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tower::ServiceExt;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn fast_harness() -> Harness {
    harness(Options {
        render_per_second: Some(Duration::from_millis(100)),
        poll: PollPolicy {
            max_attempts: 200,
            interval: Duration::from_millis(50),
        },
        ..Default::default()
    })
}

async fn request(state: ServerState, method: &str, uri: &str) -> (StatusCode, Value) {
    let response = server::router(state)
        .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

async fn serve(state: ServerState) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, server::router(state)).await.unwrap() });
    addr
}

async fn connect(addr: SocketAddr, job_id: uuid::Uuid) -> WsStream {
    let (ws, _) = connect_async(format!("ws://{addr}/jobs/{job_id}/stream")).await.unwrap();
    ws
}

/// Next JSON text frame, or `None` once the server closes the stream.
async fn next_frame(ws: &mut WsStream) -> Option<Value> {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(10), ws.next())
            .await
            .expect("frame within 10s")?;
        match message.ok()? {
            WsMessage::Text(text) => return Some(serde_json::from_str(&text).unwrap()),
            WsMessage::Close(_) => return None,
            _ => continue,
        }
    }
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_reports_ok_then_degraded_after_stop() {
    let h = fast_harness();

    let (status, body) = request(h.server_state(), "GET", "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["db_healthy"], true);
    assert_eq!(body["accepting_jobs"], true);

    h.dispatcher.stop();
    let (status, body) = request(h.server_state(), "GET", "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["accepting_jobs"], false);
}

// ---------------------------------------------------------------------------
// Snapshots and cancel
// ---------------------------------------------------------------------------

#[tokio::test]
async fn get_job_returns_snapshot_or_not_found() {
    let h = fast_harness();
    let msg = h.seed("mock", 4).await;

    let (status, body) = request(h.server_state(), "GET", &format!("/jobs/{}", msg.job_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["job_id"], msg.job_id.to_string());
    assert_eq!(body["status"], "pending");
    assert_eq!(body["progress"], 0);
    assert!(body.get("result_url").is_none());

    let missing = uuid::Uuid::new_v4();
    let (status, body) = request(h.server_state(), "GET", &format!("/jobs/{missing}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");

    let (status, _) = request(h.server_state(), "GET", "/jobs/not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cancel_of_job_not_running_here_reports_false() {
    let h = fast_harness();
    let msg = h.seed("mock", 4).await;

    let (status, body) = request(h.server_state(), "POST", &format!("/jobs/{}/cancel", msg.job_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cancelled"], false);
    assert_eq!(h.job(msg.job_id).await.status, pulse_db::models::status::JobStatus::Pending);
}

// ---------------------------------------------------------------------------
// Live status stream
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stream_follows_job_to_completion() {
    let h = fast_harness();
    let addr = serve(h.server_state()).await;
    let msg = h.seed("mock", 4).await;

    let mut ws = connect(addr, msg.job_id).await;
    let first = next_frame(&mut ws).await.unwrap();
    assert_eq!(first["type"], "job_status");
    assert_eq!(first["job"]["status"], "pending");

    h.queue.send(msg.to_body());
    let worker = h.start();

    let mut statuses = Vec::new();
    let mut last_progress = 0;
    let end = loop {
        let frame = next_frame(&mut ws).await.expect("stream ends with stream_end");
        if frame["type"] != "job_status" {
            break frame;
        }
        let progress = frame["job"]["progress"].as_i64().unwrap();
        assert!(progress >= last_progress, "progress went backwards: {frame}");
        last_progress = progress;
        statuses.push(frame["job"].clone());
    };

    assert_eq!(end["type"], "stream_end");
    assert_eq!(end["job_id"], msg.job_id.to_string());
    let last = statuses.last().unwrap();
    assert_eq!(last["status"], "completed");
    assert_eq!(last["progress"], 100);
    assert!(last["result_url"].as_str().is_some_and(|url| !url.is_empty()));
    assert!(next_frame(&mut ws).await.is_none());

    h.dispatcher.stop();
    worker.await.unwrap();
}

#[tokio::test]
async fn stream_of_finished_job_sends_one_snapshot() {
    let h = fast_harness();
    let addr = serve(h.server_state()).await;
    let worker = h.start();
    let (msg, _) = h.enqueue("mock", 4).await;
    h.wait_for_terminal(msg.job_id).await;

    let mut ws = connect(addr, msg.job_id).await;
    let status = next_frame(&mut ws).await.unwrap();
    assert_eq!(status["type"], "job_status");
    assert_eq!(status["job"]["status"], "completed");
    let end = next_frame(&mut ws).await.unwrap();
    assert_eq!(end["type"], "stream_end");
    assert!(next_frame(&mut ws).await.is_none());

    h.dispatcher.stop();
    worker.await.unwrap();
}

#[tokio::test]
async fn stream_of_unknown_job_reports_error() {
    let h = fast_harness();
    let addr = serve(h.server_state()).await;
    let missing = uuid::Uuid::new_v4();

    let mut ws = connect(addr, missing).await;
    let frame = next_frame(&mut ws).await.unwrap();
    assert_eq!(frame["type"], "stream_error");
    assert_eq!(frame["job_id"], missing.to_string());
    assert!(frame["error"].as_str().unwrap().contains("not found"));
    assert!(next_frame(&mut ws).await.is_none());
    assert_eq!(h.publisher.active_channels(), 0);
}
