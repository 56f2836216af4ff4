//! Per-item processing: fetch → transcode → upload → enhance → classify.
//!
//! An enhanced image is uploaded under a fresh key and the first upload is
//! deleted, so a processed item owns exactly one stored object.
//!
//! Stages run strictly in sequence for one item. Every failure comes back as
//! an [`ItemError`] whose kind tells the scheduler whether the item is to
//! blame.

use crate::source::{FetchError, MediaSource};
use bytes::Bytes;
use propflow_core::{Classification, ItemError, ItemErrorKind, ItemUpdate, MediaItem};
use propflow_plugins::{ClassificationWorker, EnhancementWorker, ImageJob, ServiceError};
use propflow_processing::{ProcessedImage, TranscodeError, TranscodeOptions, Transcoder};
use propflow_storage::{Storage, StorageError, StoredObject};
use std::sync::Arc;

pub struct ItemPipeline {
    source: Arc<dyn MediaSource>,
    storage: Arc<dyn Storage>,
    namespace: String,
    transcode: TranscodeOptions,
    enhancement: Option<EnhancementWorker>,
    classification: Option<ClassificationWorker>,
}

impl ItemPipeline {
    pub fn new(
        source: Arc<dyn MediaSource>,
        storage: Arc<dyn Storage>,
        namespace: impl Into<String>,
        transcode: TranscodeOptions,
    ) -> Self {
        Self {
            source,
            storage,
            namespace: namespace.into(),
            transcode,
            enhancement: None,
            classification: None,
        }
    }

    pub fn with_enhancement(mut self, worker: Option<EnhancementWorker>) -> Self {
        self.enhancement = worker;
        self
    }

    pub fn with_classification(mut self, worker: Option<ClassificationWorker>) -> Self {
        self.classification = worker;
        self
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Run every stage for `item` and return the fields to store with
    /// `processed`.
    pub async fn run(&self, item: &MediaItem) -> Result<ItemUpdate, ItemError> {
        let fetched = self
            .source
            .fetch(&item.source_ref)
            .await
            .map_err(fetch_error)?;
        let declared = fetched
            .content_type
            .clone()
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let processed = self.transcode(fetched.data, declared).await?;
        tracing::info!(
            item_id = %item.id,
            original_width = processed.original_width,
            original_height = processed.original_height,
            width = processed.width,
            height = processed.height,
            original_size_bytes = processed.original_size_bytes,
            processed_size_bytes = processed.processed_size_bytes,
            "Item transcoded"
        );

        let mut stored = self.upload(&processed).await?;
        let mut final_bytes = processed.data.clone();

        if let Some(worker) = &self.enhancement {
            let mut job = ImageJob::new(item.id, processed.data.clone(), processed.content_type)
                .with_source_url(stored.url.clone());
            let enhanced = worker
                .process(&mut job)
                .await
                .map_err(|e| service_error("enhance", e))?;

            // The enhanced image replaces the first upload as the item's asset.
            let normalized = self.normalize(enhanced.data, enhanced.content_type).await?;
            let superseded = std::mem::replace(&mut stored, self.upload(&normalized).await?);
            final_bytes = normalized.data;
            tracing::debug!(item_id = %item.id, path = %stored.path, "Enhanced image stored");

            if let Err(e) = self.storage.delete(&superseded.path).await {
                tracing::warn!(
                    item_id = %item.id,
                    path = %superseded.path,
                    error = %e,
                    "Failed to delete superseded upload"
                );
            }
        }

        let classification = match &self.classification {
            Some(worker) => Some(self.classify(worker, item, final_bytes, &stored).await?),
            None => None,
        };

        Ok(ItemUpdate::processed(stored.path, stored.url, classification))
    }

    async fn transcode(&self, data: Bytes, declared: String) -> Result<ProcessedImage, ItemError> {
        let options = self.transcode.clone();
        tokio::task::spawn_blocking(move || Transcoder::process(&data, &declared, &options))
            .await
            .map_err(|e| ItemError::fatal("transcode", anyhow::anyhow!("Transcode task failed: {}", e)))?
            .map_err(transcode_error)
    }

    /// Enhancer output is not held to the source ceiling or allow-list.
    async fn normalize(&self, data: Bytes, declared: String) -> Result<ProcessedImage, ItemError> {
        let options = self.transcode.clone();
        tokio::task::spawn_blocking(move || Transcoder::normalize(&data, &declared, &options))
            .await
            .map_err(|e| ItemError::fatal("transcode", anyhow::anyhow!("Transcode task failed: {}", e)))?
            .map_err(transcode_error)
    }

    async fn upload(&self, image: &ProcessedImage) -> Result<StoredObject, ItemError> {
        self.storage
            .upload(
                &self.namespace,
                image.content_type,
                image.extension,
                image.data.clone(),
            )
            .await
            .map_err(|e| storage_error("upload", e))
    }

    async fn classify(
        &self,
        worker: &ClassificationWorker,
        item: &MediaItem,
        image: Bytes,
        stored: &StoredObject,
    ) -> Result<Classification, ItemError> {
        let mut job = ImageJob::new(item.id, image, propflow_processing::transcoder::OUTPUT_CONTENT_TYPE)
            .with_source_url(stored.url.clone());
        worker
            .process(&mut job)
            .await
            .map_err(|e| service_error("classify", e))
    }
}

fn fetch_error(err: FetchError) -> ItemError {
    let kind = if err.is_transient() {
        ItemErrorKind::Transient
    } else {
        ItemErrorKind::Validation
    };
    ItemError::new(kind, "fetch", err)
}

fn transcode_error(err: TranscodeError) -> ItemError {
    if err.is_input_error() {
        ItemError::validation("transcode", err)
    } else {
        ItemError::transient("transcode", err)
    }
}

/// Invalid paths and bad configuration mean the pipeline is broken, not the
/// item.
fn storage_error(stage: &'static str, err: StorageError) -> ItemError {
    if err.is_contract_violation() {
        ItemError::fatal(stage, err)
    } else {
        ItemError::transient(stage, err)
    }
}

fn service_error(stage: &'static str, err: ServiceError) -> ItemError {
    let kind = match &err {
        ServiceError::RateLimited { .. } => ItemErrorKind::RateLimited,
        ServiceError::Unavailable { .. } => ItemErrorKind::Transient,
        ServiceError::InvalidRequest { .. } => ItemErrorKind::Validation,
    };
    ItemError::new(kind, stage, err)
}
