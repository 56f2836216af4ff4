//! Propflow Core Library
//!
//! This crate provides the domain models, error types and configuration shared by
//! every component of the media migration pipeline.

pub mod config;
pub mod error;
pub mod item_error;
pub mod models;
pub mod storage_types;

// Re-export commonly used types
pub use config::PipelineConfig;
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use item_error::{ItemError, ItemErrorKind, ItemResultExt};
pub use storage_types::StorageBackend;
pub use models::{
    BatchProgress, Classification, ItemUpdate, MediaItem, MediaStatus, MediaType, MigrationRun,
    RawClassification, RoomLabel, RunState, StatusCounts,
};
