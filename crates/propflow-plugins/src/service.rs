//! Seams for the external AI services.
//!
//! Implementations make exactly one call per invocation and classify their
//! failures as [`ServiceError`]. Retrying and concurrency limiting live in the
//! workers, so fakes used in tests get the same treatment as real clients.

use crate::ServiceError;
use async_trait::async_trait;
use bytes::Bytes;
use propflow_core::RawClassification;
use std::fmt::Debug;

/// Image bytes returned by an enhancement service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnhancedImage {
    pub data: Bytes,
    pub content_type: String,
}

/// Produces an improved version of a photo.
#[async_trait]
pub trait Enhancer: Send + Sync + Debug {
    /// Short name used in logs and error messages
    fn name(&self) -> &'static str;

    async fn enhance(&self, image: Bytes, content_type: &str)
        -> Result<EnhancedImage, ServiceError>;
}

/// Labels a photo with room types.
///
/// Returns the service's answer as-is; clamping into the closed vocabulary is
/// done by the worker.
#[async_trait]
pub trait Classifier: Send + Sync + Debug {
    /// Short name used in logs and error messages
    fn name(&self) -> &'static str;

    async fn classify(
        &self,
        image: Bytes,
        content_type: &str,
    ) -> Result<RawClassification, ServiceError>;
}
