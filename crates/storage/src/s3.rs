//! S3-backed object store.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use pulse_core::clock::Clock;

use crate::error::StorageError;
use crate::object_store::{ObjectStore, PutObject};

pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
    clock: Arc<dyn Clock>,
}

impl S3ObjectStore {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            clock,
        }
    }
}

/// Dispatch failures, timeouts and 5xx responses are transient.
fn classify<E>(e: SdkError<E, HttpResponse>) -> StorageError
where
    E: std::error::Error + 'static,
{
    let transient = match &e {
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) | SdkError::ResponseError(_) => true,
        SdkError::ServiceError(_) => e
            .raw_response()
            .is_some_and(|r| r.status().is_server_error()),
        _ => false,
    };
    let message = DisplayErrorContext(&e).to_string();
    if transient {
        StorageError::Unavailable(message)
    } else {
        StorageError::Backend(message)
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, object: PutObject) -> Result<(), StorageError> {
        let size = object.bytes.len();
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&object.key)
            .content_type(&object.content_type)
            .body(ByteStream::from(object.bytes));
        for (name, value) in &object.metadata {
            request = request.metadata(name, value);
        }
        request.send().await.map_err(classify)?;

        tracing::info!(bucket = %self.bucket, key = %object.key, size, "Object uploaded to S3");
        Ok(())
    }

    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        let config = PresigningConfig::builder()
            .start_time(SystemTime::from(self.clock.now()))
            .expires_in(ttl)
            .build()
            .map_err(|e| StorageError::Presign(e.to_string()))?;
        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(config)
            .await
            .map_err(|e| StorageError::Presign(DisplayErrorContext(&e).to_string()))?;
        Ok(presigned.uri().to_string())
    }
}
