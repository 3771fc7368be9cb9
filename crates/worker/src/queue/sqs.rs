//! Amazon SQS job queue.

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_sqs::config::http::HttpResponse;
use aws_sdk_sqs::error::{DisplayErrorContext, SdkError};
use aws_sdk_sqs::types::{Message, MessageAttributeValue, MessageSystemAttributeName};

use super::{JobQueue, QueueError, ReceiveOptions, ReceivedMessage};

/// SQS caps a single long poll at 20 seconds.
const MAX_WAIT_SECS: u64 = 20;

/// SQS caps visibility timeouts at 12 hours.
const MAX_VISIBILITY_SECS: u64 = 12 * 60 * 60;

pub struct SqsQueue {
    client: aws_sdk_sqs::Client,
    queue_url: String,
    dead_letter_queue_url: Option<String>,
}

impl SqsQueue {
    pub fn new(
        client: aws_sdk_sqs::Client,
        queue_url: impl Into<String>,
        dead_letter_queue_url: Option<String>,
    ) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
            dead_letter_queue_url,
        }
    }
}

fn seconds(d: Duration, max: u64) -> i32 {
    d.as_secs().min(max) as i32
}

/// Transport failures and 5xx responses mean the queue is unavailable;
/// anything else the service answered is a rejection.
fn classify<E>(e: SdkError<E, HttpResponse>) -> QueueError
where
    E: std::error::Error + 'static,
{
    let rejected = matches!(e, SdkError::ServiceError(_))
        && e
            .raw_response()
            .is_some_and(|r| r.status().is_client_error());
    let message = DisplayErrorContext(&e).to_string();
    if rejected {
        QueueError::Rejected(message)
    } else {
        QueueError::Unavailable(message)
    }
}

fn to_received(message: &Message) -> Option<ReceivedMessage> {
    let receipt_handle = message.receipt_handle()?.to_string();
    let receive_count = message
        .attributes()
        .and_then(|a| a.get(&MessageSystemAttributeName::ApproximateReceiveCount))
        .and_then(|v| v.parse().ok())
        .unwrap_or(1);
    Some(ReceivedMessage {
        message_id: message.message_id().unwrap_or_default().to_string(),
        receipt_handle,
        body: message.body().map(str::to_string),
        receive_count,
    })
}

#[async_trait]
impl JobQueue for SqsQueue {
    async fn receive(&self, options: &ReceiveOptions) -> Result<Vec<ReceivedMessage>, QueueError> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(options.max_messages.clamp(1, 10) as i32)
            .wait_time_seconds(seconds(options.wait_time, MAX_WAIT_SECS))
            .visibility_timeout(seconds(options.visibility_timeout, MAX_VISIBILITY_SECS))
            .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount)
            .send()
            .await
            .map_err(classify)?;

        let messages = output
            .messages()
            .iter()
            .filter_map(|m| {
                let received = to_received(m);
                if received.is_none() {
                    tracing::warn!(message_id = ?m.message_id(), "SQS message without receipt handle");
                }
                received
            })
            .collect();
        Ok(messages)
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn extend_visibility(&self, receipt_handle: &str, timeout: Duration) -> Result<(), QueueError> {
        self.client
            .change_message_visibility()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .visibility_timeout(seconds(timeout, MAX_VISIBILITY_SECS))
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn dead_letter(&self, message: &ReceivedMessage, reason: &str) -> Result<(), QueueError> {
        match &self.dead_letter_queue_url {
            Some(dlq) => {
                let reason_attr = MessageAttributeValue::builder()
                    .data_type("String")
                    .string_value(reason)
                    .build()
                    .map_err(|e| QueueError::Rejected(e.to_string()))?;
                self.client
                    .send_message()
                    .queue_url(dlq)
                    .message_body(message.body.clone().unwrap_or_default())
                    .message_attributes("dead_letter_reason", reason_attr)
                    .send()
                    .await
                    .map_err(classify)?;
                tracing::warn!(message_id = %message.message_id, reason, "Message moved to dead-letter queue");
            }
            None => {
                tracing::error!(
                    message_id = %message.message_id,
                    reason,
                    body = ?message.body,
                    "No dead-letter queue configured, dropping message",
                );
            }
        }
        self.delete(&message.receipt_handle).await
    }
}
