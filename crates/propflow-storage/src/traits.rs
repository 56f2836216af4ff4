//! Storage abstraction trait
//!
//! This module defines the Storage trait that all object store backends implement.

use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Backend could not be reached or refused the request. Retryable.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// Malformed key or namespace. A caller bug, never retried.
    #[error("Invalid storage path: {0}")]
    InvalidPath(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl StorageError {
    /// Whether the same call may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Unavailable(_) | StorageError::IoError(_))
    }

    /// Errors that mean the pipeline itself is misconfigured.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            StorageError::InvalidPath(_) | StorageError::ConfigError(_)
        )
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Location of an uploaded object plus a time-limited access URL for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Durable key. Everything else can be re-derived from it.
    pub path: String,
    pub url: String,
}

/// Object store abstraction
///
/// **Key format:** `media/{namespace}/{uuid}.{extension}`. Keys are generated
/// by the backend on every upload, so an upload never overwrites an existing
/// object.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Store `data` under a fresh key in `namespace` and return its path and
    /// a signed URL.
    async fn upload(
        &self,
        namespace: &str,
        content_type: &str,
        extension: &str,
        data: Bytes,
    ) -> StorageResult<StoredObject>;

    /// Issue a new time-limited URL for an existing path. Does not touch the
    /// stored bytes.
    async fn reissue_url(&self, path: &str) -> StorageResult<String>;

    async fn download(&self, path: &str) -> StorageResult<Bytes>;

    async fn exists(&self, path: &str) -> StorageResult<bool>;

    /// Remove the object at `path`. Deleting a missing object succeeds.
    async fn delete(&self, path: &str) -> StorageResult<()>;

    fn backend_type(&self) -> StorageBackend;
}
