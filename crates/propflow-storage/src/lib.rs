//! Propflow Storage Library
//!
//! Object store client for processed media. Provides the `Storage` trait and
//! S3, local filesystem and in-memory implementations.
//!
//! # Storage key format
//!
//! `media/{namespace}/{uuid}.{extension}`. Keys are generated inside the
//! backend on every upload and must not contain `..` or a leading `/`.
//! Access URLs are time-limited and can be reissued from the key at any time.

pub mod factory;
pub(crate) mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
pub mod memory;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod signing;
pub mod traits;

// Re-export commonly used types
pub use factory::create_storage;
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
pub use memory::MemoryStorage;
pub use propflow_core::StorageBackend;
#[cfg(feature = "storage-s3")]
pub use s3::S3Storage;
pub use signing::UrlSigner;
pub use traits::{Storage, StorageError, StorageResult, StoredObject};
