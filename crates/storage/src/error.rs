#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Network failure or a 5xx from the backend. Worth retrying.
    #[error("storage temporarily unavailable: {0}")]
    Unavailable(String),

    #[error("storage request failed: {0}")]
    Backend(String),

    #[error("could not presign URL: {0}")]
    Presign(String),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("signed URL has expired")]
    Expired,

    #[error("signed URL signature does not match")]
    InvalidSignature,

    #[error("not a signed URL for this store: {0}")]
    InvalidUrl(String),
}

impl StorageError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Unavailable(_))
    }
}
