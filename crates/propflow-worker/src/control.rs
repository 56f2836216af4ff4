//! Control facade over the migration.
//!
//! `start`, `pause`, `retry_errors` and `status` are the operator surface;
//! everything else here wires the stores, the state actor and the scheduler
//! together and keeps them consistent across restarts.

use crate::machine::StartOutcome;
use crate::pipeline::ItemPipeline;
use crate::scheduler::{BatchScheduler, SchedulerConfig};
use crate::source::SourceFetcher;
use crate::state::StateHandle;
use anyhow::Context;
use propflow_core::{AppError, MediaItem, MediaStatus, MigrationRun, PipelineConfig, RunState};
use propflow_db::{ControlLease, ItemStore, RunStore};
use propflow_processing::TranscodeOptions;
use propflow_storage::Storage;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Result of a `start` call.
#[derive(Debug, Clone)]
pub struct StartReport {
    pub outcome: StartOutcome,
    pub run: MigrationRun,
}

/// Result of a `retry_errors` call.
#[derive(Debug, Clone)]
pub struct RequeueReport {
    pub requeued: u64,
    pub run: MigrationRun,
}

pub struct MigrationControl {
    items: Arc<dyn ItemStore>,
    storage: Arc<dyn Storage>,
    state: StateHandle,
    scheduler: BatchScheduler,
    _lease: ControlLease,
}

impl MigrationControl {
    /// Claim control of the run, spawn the state actor, recover anything a
    /// previous process left behind, then start the scheduler.
    ///
    /// Run state lives in this process, so only one controller may share a
    /// pair of stores. A second one fails with `Conflict` before touching
    /// any item.
    pub async fn new(
        items: Arc<dyn ItemStore>,
        runs: Arc<dyn RunStore>,
        pipeline: ItemPipeline,
        config: SchedulerConfig,
    ) -> Result<Self, AppError> {
        let lease = runs.acquire_control().await?;
        let (state, _actor) = StateHandle::spawn(runs).await?;
        recover(items.as_ref(), &state).await?;

        let storage = pipeline.storage().clone();
        let scheduler = BatchScheduler::spawn(items.clone(), state.clone(), Arc::new(pipeline), config);

        Ok(Self {
            items,
            storage,
            state,
            scheduler,
            _lease: lease,
        })
    }

    /// Build every collaborator from configuration.
    pub async fn from_config(config: &PipelineConfig) -> anyhow::Result<Self> {
        let (items, runs) = propflow_db::create_stores(config)
            .await
            .context("Failed to initialize item and run stores")?;
        let storage = propflow_storage::create_storage(config)
            .await
            .context("Failed to initialize object storage")?;
        let source = SourceFetcher::new(Duration::from_secs(config.source_fetch_timeout_secs))?;

        let pipeline = ItemPipeline::new(
            Arc::new(source),
            storage,
            config.storage_namespace.clone(),
            TranscodeOptions::from_config(config),
        )
        .with_enhancement(propflow_plugins::enhancement_worker_from_config(config)?)
        .with_classification(propflow_plugins::classification_worker_from_config(config)?);

        Ok(Self::new(items, runs, pipeline, SchedulerConfig::from_config(config)).await?)
    }

    /// Start or resume the run. A no-op while already running.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self) -> Result<StartReport, AppError> {
        let counts = self.items.count_by_status().await?;
        let (outcome, run) = self.state.start(counts).await?;
        Ok(StartReport { outcome, run })
    }

    /// Stop dispatching new items. In-flight items finish.
    #[tracing::instrument(skip(self))]
    pub async fn pause(&self) -> Result<MigrationRun, AppError> {
        self.state.pause().await
    }

    /// Put every errored item back in the queue. Does not start the run.
    #[tracing::instrument(skip(self))]
    pub async fn retry_errors(&self) -> Result<RequeueReport, AppError> {
        let requeued = self.items.requeue_errors().await?;
        let run = if requeued > 0 {
            self.state.requeued(requeued).await?
        } else {
            self.state.snapshot()
        };
        tracing::info!(requeued, "Errored items requeued");
        Ok(RequeueReport { requeued, run })
    }

    /// Latest published snapshot. Never waits on the pipeline.
    pub fn status(&self) -> MigrationRun {
        self.state.snapshot()
    }

    /// Add photos to the queue by source reference.
    #[tracing::instrument(skip(self, source_refs), fields(count = source_refs.len()))]
    pub async fn enqueue(&self, source_refs: Vec<String>) -> Result<Vec<MediaItem>, AppError> {
        let mut inserted = Vec::with_capacity(source_refs.len());
        for source_ref in source_refs {
            let source_ref = source_ref.trim().to_string();
            if source_ref.is_empty() {
                return Err(AppError::InvalidInput(
                    "sourceRef must not be empty".to_string(),
                ));
            }
            inserted.push(self.items.insert(MediaItem::new_photo(source_ref)).await?);
        }

        if !inserted.is_empty() {
            self.state.enqueued(inserted.len() as u64).await?;
        }
        Ok(inserted)
    }

    pub async fn item(&self, id: Uuid) -> Result<MediaItem, AppError> {
        self.items
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Item {} not found", id)))
    }

    /// Fresh time-limited URL for a processed item. Nothing is re-uploaded.
    pub async fn reissue_url(&self, id: Uuid) -> Result<String, AppError> {
        let item = self.item(id).await?;
        let path = match (item.status, item.processed_path.as_deref()) {
            (MediaStatus::Processed, Some(path)) => path.to_string(),
            _ => {
                return Err(AppError::Conflict(format!(
                    "Item {} has not been processed",
                    id
                )))
            }
        };

        self.storage.reissue_url(&path).await.map_err(|e| match e {
            propflow_storage::StorageError::NotFound(msg) => AppError::NotFound(msg),
            other => AppError::Storage(other.to_string()),
        })
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<MigrationRun> {
        self.state.subscribe()
    }

    /// Stop the scheduler and wait for in-flight items.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}

/// Return items a previous process left in flight, rebuild counters from the
/// item store and settle a run that was running with nothing left to do. Runs
/// before the scheduler exists, so nothing here can be in flight.
async fn recover(items: &dyn ItemStore, state: &StateHandle) -> Result<MigrationRun, AppError> {
    let reset = items.reset_processing().await?;
    if reset > 0 {
        tracing::warn!(count = reset, "Returned interrupted items to pending");
    }

    let counts = items.count_by_status().await?;
    let run = state.reconcile(counts).await?;
    tracing::info!(
        state = %run.state,
        total = run.total_items,
        pending = run.pending_count,
        processed = run.processed_count,
        errors = run.error_count,
        "Migration state recovered"
    );

    if run.state == RunState::Running && !run.has_work() {
        state.complete().await?;
    }
    Ok(state.snapshot())
}
