//! Artifact persistence.
//!
//! - [`ObjectStore`]: put bytes and presign time-limited GET URLs.
//!   [`S3ObjectStore`] for production, [`MemoryObjectStore`] for tests and
//!   local runs.
//! - [`ArtifactUploader`]: copies a provider-hosted result into the
//!   object store and returns the signed URL stored on the job.

pub mod error;
pub mod memory;
pub mod object_store;
pub mod s3;
pub mod uploader;

pub use error::StorageError;
pub use memory::MemoryObjectStore;
pub use object_store::{ObjectStore, PutObject};
pub use s3::S3ObjectStore;
pub use uploader::{ArtifactCategory, ArtifactSource, ArtifactUploader, FetchError, UploadError};
