//! In-process object store with HMAC-signed URLs.
//!
//! URLs look like `memory://{bucket}/{key}?expires={unix}&signature={hex}`.
//! The signature covers the bucket, key and expiry, so [`resolve`] rejects
//! tampered URLs as well as expired ones.
//!
//! [`resolve`]: MemoryObjectStore::resolve

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use pulse_core::clock::Clock;
use rand::Rng;
use sha2::Sha256;
use tokio::sync::RwLock;

use crate::error::StorageError;
use crate::object_store::{ObjectStore, PutObject};

type HmacSha256 = Hmac<Sha256>;

const SCHEME: &str = "memory://";

pub struct MemoryObjectStore {
    bucket: String,
    secret: [u8; 32],
    clock: Arc<dyn Clock>,
    objects: RwLock<HashMap<String, PutObject>>,
    failing_puts: AtomicU32,
}

impl MemoryObjectStore {
    /// A store signing with a random secret.
    pub fn new(bucket: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        let mut secret = [0u8; 32];
        rand::rng().fill(&mut secret);
        Self::with_secret(bucket, secret, clock)
    }

    pub fn with_secret(bucket: impl Into<String>, secret: [u8; 32], clock: Arc<dyn Clock>) -> Self {
        Self {
            bucket: bucket.into(),
            secret,
            clock,
            objects: RwLock::new(HashMap::new()),
            failing_puts: AtomicU32::new(0),
        }
    }

    /// Make the next `n` puts fail with a transient error.
    pub fn fail_next_puts(&self, n: u32) {
        self.failing_puts.store(n, Ordering::SeqCst);
    }

    /// The stored object under `key`, if any.
    pub async fn object(&self, key: &str) -> Option<PutObject> {
        self.objects.read().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    /// Verify a signed URL and return the object's bytes.
    pub async fn resolve(&self, url: &str) -> Result<Vec<u8>, StorageError> {
        let invalid = || StorageError::InvalidUrl(url.to_string());

        let rest = url.strip_prefix(SCHEME).ok_or_else(invalid)?;
        let (path, query) = rest.split_once('?').ok_or_else(invalid)?;
        let (bucket, key) = path.split_once('/').ok_or_else(invalid)?;
        if bucket != self.bucket {
            return Err(invalid());
        }

        let mut expires = None;
        let mut signature = None;
        for pair in query.split('&') {
            match pair.split_once('=') {
                Some(("expires", v)) => expires = v.parse::<i64>().ok(),
                Some(("signature", v)) => signature = hex::decode(v),
                _ => {}
            }
        }
        let (expires, signature) = expires.zip(signature).ok_or_else(invalid)?;

        self.mac(key, expires)
            .verify_slice(&signature)
            .map_err(|_| StorageError::InvalidSignature)?;
        if self.clock.now().timestamp() >= expires {
            return Err(StorageError::Expired);
        }

        self.objects
            .read()
            .await
            .get(key)
            .map(|o| o.bytes.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    fn mac(&self, key: &str, expires: i64) -> HmacSha256 {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(self.bucket.as_bytes());
        mac.update(b"/");
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        mac
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, object: PutObject) -> Result<(), StorageError> {
        let failing = self
            .failing_puts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StorageError::Unavailable("injected put failure".into()));
        }
        self.objects.write().await.insert(object.key.clone(), object);
        Ok(())
    }

    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        let ttl = chrono::Duration::from_std(ttl).map_err(|e| StorageError::Presign(e.to_string()))?;
        let expires = (self.clock.now() + ttl).timestamp();
        let signature = hex::encode(self.mac(key, expires).finalize().into_bytes());
        Ok(format!(
            "{SCHEME}{}/{key}?expires={expires}&signature={signature}",
            self.bucket
        ))
    }
}

// ---------------------------------------------------------------------------
// hex encoding helper (no extra dep)
// ---------------------------------------------------------------------------

mod hex {
    /// Encode bytes as a lowercase hex string.
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Decode a hex string; `None` on odd length or non-hex digits.
    pub fn decode(s: &str) -> Option<Vec<u8>> {
        if s.len() % 2 != 0 {
            return None;
        }
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
            .collect()
    }
}
