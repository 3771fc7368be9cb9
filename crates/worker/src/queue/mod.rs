//! The durable job queue seam.
//!
//! Delivery is at-least-once. A received message stays invisible for the
//! visibility timeout and is redelivered unless it is deleted first.

use std::time::Duration;

use async_trait::async_trait;
use pulse_core::error::JobError;

mod memory;
mod sqs;

pub use memory::{DeadLetter, MemoryQueue};
pub use sqs::SqsQueue;

/// Parameters for one receive call.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiveOptions {
    pub max_messages: u32,
    /// Long-poll duration.
    pub wait_time: Duration,
    /// How long received messages stay hidden from other consumers.
    pub visibility_timeout: Duration,
}

/// A message as handed out by the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    pub message_id: String,
    /// Handle for delete and visibility calls; valid for this delivery only.
    pub receipt_handle: String,
    pub body: Option<String>,
    /// How many times the message has been received, this delivery included.
    pub receive_count: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue unavailable: {0}")]
    Unavailable(String),

    /// The receipt handle does not belong to the message's current delivery.
    #[error("stale receipt handle: {0}")]
    StaleReceipt(String),

    #[error("queue request rejected: {0}")]
    Rejected(String),
}

impl From<QueueError> for JobError {
    fn from(e: QueueError) -> Self {
        JobError::Queue(e.to_string())
    }
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Long-poll for messages. An empty result means the wait elapsed.
    async fn receive(&self, options: &ReceiveOptions) -> Result<Vec<ReceivedMessage>, QueueError>;

    /// Acknowledge a message.
    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError>;

    /// Keep an in-flight message hidden for another `timeout`. A zero
    /// timeout makes it receivable again immediately.
    async fn extend_visibility(&self, receipt_handle: &str, timeout: Duration) -> Result<(), QueueError>;

    /// Move a message out of the work queue, recording `reason`.
    async fn dead_letter(&self, message: &ReceivedMessage, reason: &str) -> Result<(), QueueError>;
}
