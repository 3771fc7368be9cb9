//! Message type constants for the live job status stream.
//!
//! Used by the status server when framing snapshots for connected
//! WebSocket clients.

/// A job state snapshot (status, progress, result or error).
pub const MSG_TYPE_JOB_STATUS: &str = "job_status";

/// Explicit end-of-stream marker sent after the terminal snapshot.
pub const MSG_TYPE_STREAM_END: &str = "stream_end";

/// Error frame sent when a subscription cannot be opened.
pub const MSG_TYPE_STREAM_ERROR: &str = "stream_error";
