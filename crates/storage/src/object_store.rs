use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::StorageError;

/// An object to write.
#[derive(Debug, Clone, PartialEq)]
pub struct PutObject {
    pub key: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
    /// User-defined metadata stored alongside the object.
    pub metadata: HashMap<String, String>,
}

/// Blob storage with presigned reads.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store an object, replacing any existing object under the same key.
    async fn put(&self, object: PutObject) -> Result<(), StorageError>;

    /// A URL granting read access to `key` for `ttl`.
    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<String, StorageError>;
}
