//! In-process queue with SQS-like visibility semantics.
//!
//! Runs on tokio time, so tests under a paused clock can step through
//! visibility timeouts deterministically.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{JobQueue, QueueError, ReceiveOptions, ReceivedMessage};

#[derive(Default)]
pub struct MemoryQueue {
    state: Mutex<State>,
    arrivals: Notify,
}

#[derive(Default)]
struct State {
    messages: Vec<Stored>,
    dead_letters: Vec<DeadLetter>,
    next_id: u64,
}

struct Stored {
    message_id: String,
    body: Option<String>,
    receive_count: u32,
    visible_at: Instant,
    /// Receipt of the latest delivery.
    receipt: Option<String>,
}

/// A message removed by [`JobQueue::dead_letter`].
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    pub message_id: String,
    pub body: Option<String>,
    pub receive_count: u32,
    pub reason: String,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a message body; returns its message id.
    pub fn send(&self, body: impl Into<String>) -> String {
        self.push(Some(body.into()))
    }

    /// Enqueue a message without a body.
    pub fn send_empty(&self) -> String {
        self.push(None)
    }

    /// Messages still in the queue, visible or in flight.
    pub fn len(&self) -> usize {
        self.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().messages.is_empty()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.lock().dead_letters.clone()
    }

    /// Times the message has been handed out so far.
    pub fn receive_count(&self, message_id: &str) -> Option<u32> {
        self.lock()
            .messages
            .iter()
            .find(|m| m.message_id == message_id)
            .map(|m| m.receive_count)
    }

    // ---- private helpers ----

    fn push(&self, body: Option<String>) -> String {
        let message_id = {
            let mut state = self.lock();
            state.next_id += 1;
            let message_id = format!("msg-{}", state.next_id);
            state.messages.push(Stored {
                message_id: message_id.clone(),
                body,
                receive_count: 0,
                visible_at: Instant::now(),
                receipt: None,
            });
            message_id
        };
        self.arrivals.notify_waiters();
        message_id
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Hand out up to `max` visible messages. Otherwise returns when the
    /// next hidden message becomes visible, if any.
    fn take_visible(&self, max: usize, visibility: Duration) -> Result<Vec<ReceivedMessage>, Option<Instant>> {
        let now = Instant::now();
        let mut state = self.lock();
        let mut taken = Vec::new();
        for stored in state.messages.iter_mut() {
            if taken.len() >= max {
                break;
            }
            if stored.visible_at > now {
                continue;
            }
            stored.receive_count += 1;
            stored.visible_at = now + visibility;
            let receipt = format!("{}#{}", stored.message_id, stored.receive_count);
            stored.receipt = Some(receipt.clone());
            taken.push(ReceivedMessage {
                message_id: stored.message_id.clone(),
                receipt_handle: receipt,
                body: stored.body.clone(),
                receive_count: stored.receive_count,
            });
        }
        if taken.is_empty() {
            Err(state.messages.iter().map(|m| m.visible_at).min())
        } else {
            Ok(taken)
        }
    }

    fn position(state: &State, receipt_handle: &str) -> Result<usize, QueueError> {
        state
            .messages
            .iter()
            .position(|m| m.receipt.as_deref() == Some(receipt_handle))
            .ok_or_else(|| QueueError::StaleReceipt(receipt_handle.to_string()))
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn receive(&self, options: &ReceiveOptions) -> Result<Vec<ReceivedMessage>, QueueError> {
        let deadline = Instant::now() + options.wait_time;
        let max = options.max_messages.max(1) as usize;
        loop {
            let arrival = self.arrivals.notified();
            tokio::pin!(arrival);
            arrival.as_mut().enable();

            let wake_at = match self.take_visible(max, options.visibility_timeout) {
                Ok(messages) => return Ok(messages),
                Err(next_visible) => next_visible.map_or(deadline, |at| at.min(deadline)),
            };
            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            tokio::select! {
                _ = &mut arrival => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
        let mut state = self.lock();
        let index = Self::position(&state, receipt_handle)?;
        state.messages.remove(index);
        Ok(())
    }

    async fn extend_visibility(&self, receipt_handle: &str, timeout: Duration) -> Result<(), QueueError> {
        let mut state = self.lock();
        let index = Self::position(&state, receipt_handle)?;
        state.messages[index].visible_at = Instant::now() + timeout;
        drop(state);
        if timeout.is_zero() {
            self.arrivals.notify_waiters();
        }
        Ok(())
    }

    async fn dead_letter(&self, message: &ReceivedMessage, reason: &str) -> Result<(), QueueError> {
        let mut state = self.lock();
        let index = Self::position(&state, &message.receipt_handle)?;
        let stored = state.messages.remove(index);
        state.dead_letters.push(DeadLetter {
            message_id: stored.message_id,
            body: stored.body,
            receive_count: stored.receive_count,
            reason: reason.to_string(),
        });
        Ok(())
    }
}
