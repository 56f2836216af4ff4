//! Batch scheduler.
//!
//! One long-lived loop that waits for the run to be `running`, pulls a batch
//! of pending items and pushes each through the [`ItemPipeline`] under a fixed
//! pool of permits. Every dispatch asks the state actor first, so a pause takes
//! effect at the next item boundary while in-flight items finish normally.
//! Counters are reconciled from the item store once a batch has drained.

use crate::pipeline::ItemPipeline;
use crate::state::{ItemResolution, StateHandle};
use propflow_core::{AppError, ItemUpdate, MediaItem, MediaStatus, PipelineConfig, RunState};
use propflow_db::ItemStore;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Items pulled per batch.
    pub batch_size: usize,
    /// Items processed concurrently.
    pub pool_size: usize,
    /// Back-off when the store reports pending items but returns none.
    pub idle_poll: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: 20,
            pool_size: 2,
            idle_poll: Duration::from_millis(500),
        }
    }
}

impl SchedulerConfig {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            batch_size: config.migration_batch_size.max(1),
            pool_size: config.migration_pool_size.max(1),
            ..Self::default()
        }
    }
}

/// How a batch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchEnd {
    /// Every pulled item was dispatched.
    Drained,
    /// Nothing pending.
    Empty,
    /// The run left `running` before the batch was fully dispatched.
    Halted,
    ShuttingDown,
}

struct Dispatcher {
    items: Arc<dyn ItemStore>,
    state: StateHandle,
    pipeline: Arc<ItemPipeline>,
    config: SchedulerConfig,
    pool: Arc<Semaphore>,
}

pub struct BatchScheduler {
    shutdown_tx: mpsc::Sender<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl BatchScheduler {
    /// Start the scheduler loop. It idles until the run is started.
    pub fn spawn(
        items: Arc<dyn ItemStore>,
        state: StateHandle,
        pipeline: Arc<ItemPipeline>,
        config: SchedulerConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let dispatcher = Dispatcher {
            pool: Arc::new(Semaphore::new(config.pool_size.max(1))),
            items,
            state,
            pipeline,
            config,
        };

        let handle = tokio::spawn(async move {
            dispatcher.run(shutdown_rx).await;
        });

        Self {
            shutdown_tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Stop dispatching and wait for in-flight items to settle.
    pub async fn shutdown(&self) {
        tracing::info!("Initiating batch scheduler shutdown");
        let _ = self.shutdown_tx.send(()).await;
        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Batch scheduler task panicked");
            }
        }
    }
}

impl Dispatcher {
    async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) {
        tracing::info!(
            batch_size = self.config.batch_size,
            pool_size = self.config.pool_size,
            "Batch scheduler started"
        );

        let mut runs = self.state.subscribe();
        loop {
            let current = runs.borrow_and_update().state;
            if current != RunState::Running {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    changed = runs.changed() => {
                        if changed.is_err() {
                            tracing::warn!("Migration state actor gone; scheduler exiting");
                            break;
                        }
                    }
                }
                continue;
            }

            match self.run_batch(&mut shutdown_rx).await {
                BatchEnd::Drained | BatchEnd::Halted => {}
                BatchEnd::Empty => {
                    // Still running means the store disagreed with itself;
                    // give it a moment instead of spinning.
                    if self.state.snapshot().state == RunState::Running {
                        tokio::select! {
                            _ = shutdown_rx.recv() => break,
                            _ = tokio::time::sleep(self.config.idle_poll) => {}
                        }
                    }
                }
                BatchEnd::ShuttingDown => break,
            }
        }

        tracing::info!("Batch scheduler stopped");
    }

    async fn run_batch(&self, shutdown_rx: &mut mpsc::Receiver<()>) -> BatchEnd {
        let batch = match self.items.list_pending(self.config.batch_size).await {
            Ok(batch) => batch,
            Err(e) => {
                self.fail_run(format!("Item store unreachable: {}", e)).await;
                return BatchEnd::Halted;
            }
        };

        if batch.is_empty() {
            self.finish_if_idle().await;
            return BatchEnd::Empty;
        }

        tracing::debug!(items = batch.len(), "Dispatching batch");

        let mut in_flight = JoinSet::new();
        let mut end = BatchEnd::Drained;

        for item in batch {
            if shutdown_requested(shutdown_rx) {
                end = BatchEnd::ShuttingDown;
                break;
            }

            let permit = match self.pool.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    end = BatchEnd::ShuttingDown;
                    break;
                }
            };

            // The pause boundary: the actor refuses once the run left
            // `running`, and counts the dispatch atomically when it allows it.
            match self.state.try_dispatch().await {
                Ok(true) => {}
                Ok(false) => {
                    end = BatchEnd::Halted;
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Migration state unavailable; stopping dispatch");
                    end = BatchEnd::ShuttingDown;
                    break;
                }
            }

            let claimed = match self
                .items
                .update_status(item.id, MediaStatus::Processing, ItemUpdate::default())
                .await
            {
                Ok(claimed) => claimed,
                Err(AppError::Conflict(_)) | Err(AppError::NotFound(_)) => {
                    // Someone else moved it since the pull.
                    tracing::debug!(item_id = %item.id, "Item no longer pending; skipped");
                    self.resolve(ItemResolution::Returned).await;
                    continue;
                }
                Err(e) => {
                    self.resolve(ItemResolution::Returned).await;
                    self.fail_run(format!("Failed to claim item {}: {}", item.id, e))
                        .await;
                    end = BatchEnd::Halted;
                    break;
                }
            };

            let items = self.items.clone();
            let state = self.state.clone();
            let pipeline = self.pipeline.clone();
            in_flight.spawn(async move {
                let _permit = permit;
                process_item(items, state, pipeline, claimed).await;
            });
        }

        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Item task panicked");
            }
        }

        self.reconcile().await;
        end
    }

    /// An empty pull: complete the run if nothing is in flight anywhere.
    async fn finish_if_idle(&self) {
        let counts = match self.items.count_by_status().await {
            Ok(counts) => counts,
            Err(e) => {
                self.fail_run(format!("Item store unreachable: {}", e)).await;
                return;
            }
        };

        if counts.processing > 0 {
            // The control lease makes this loop the only dispatcher and its
            // batch has drained, so these were orphaned by an earlier process.
            match self.items.reset_processing().await {
                Ok(n) => tracing::warn!(count = n, "Returned orphaned processing items to pending"),
                Err(e) => tracing::error!(error = %e, "Failed to reset orphaned processing items"),
            }
            self.reconcile().await;
            return;
        }

        if let Err(e) = self.state.reconcile(counts).await {
            tracing::error!(error = %e, "Failed to reconcile counters");
            return;
        }
        if counts.pending == 0 {
            if let Err(e) = self.state.complete().await {
                tracing::error!(error = %e, "Failed to complete migration run");
            }
        }
    }

    async fn reconcile(&self) {
        match self.items.count_by_status().await {
            Ok(counts) => {
                if let Err(e) = self.state.reconcile(counts).await {
                    tracing::error!(error = %e, "Failed to reconcile counters");
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to count items for reconciliation"),
        }
    }

    async fn resolve(&self, resolution: ItemResolution) {
        if let Err(e) = self.state.resolved(resolution).await {
            tracing::error!(error = %e, "Failed to record item resolution");
        }
    }

    async fn fail_run(&self, reason: String) {
        if let Err(e) = self.state.fail(reason).await {
            tracing::error!(error = %e, "Failed to record run failure");
        }
    }
}

fn shutdown_requested(shutdown_rx: &mut mpsc::Receiver<()>) -> bool {
    match shutdown_rx.try_recv() {
        Ok(()) | Err(TryRecvError::Disconnected) => true,
        Err(TryRecvError::Empty) => false,
    }
}

/// Run one claimed item to a terminal status and report it to the actor.
async fn process_item(
    items: Arc<dyn ItemStore>,
    state: StateHandle,
    pipeline: Arc<ItemPipeline>,
    item: MediaItem,
) {
    let started = Instant::now();

    let resolution = match pipeline.run(&item).await {
        Ok(update) => {
            let path = update.processed_path.clone().unwrap_or_default();
            match items
                .update_status(item.id, MediaStatus::Processed, update)
                .await
            {
                Ok(_) => {
                    tracing::info!(
                        item_id = %item.id,
                        path = %path,
                        duration_ms = started.elapsed().as_millis() as u64,
                        "Item processed"
                    );
                    ItemResolution::Processed
                }
                Err(e) => record_store_failure(&state, &item, e).await,
            }
        }
        Err(err) if err.is_item_failure() => {
            tracing::warn!(
                item_id = %item.id,
                source_ref = %item.source_ref,
                stage = err.stage(),
                kind = err.kind().as_str(),
                error = %err.inner(),
                duration_ms = started.elapsed().as_millis() as u64,
                "Item failed"
            );
            match items
                .update_status(
                    item.id,
                    MediaStatus::Error,
                    ItemUpdate::failed(err.summary()),
                )
                .await
            {
                Ok(_) => ItemResolution::Failed,
                Err(e) => record_store_failure(&state, &item, e).await,
            }
        }
        Err(err) => {
            tracing::error!(
                item_id = %item.id,
                stage = err.stage(),
                error = %err.inner(),
                "Fatal pipeline error; stopping the run"
            );
            if let Err(e) = items
                .update_status(item.id, MediaStatus::Pending, ItemUpdate::default())
                .await
            {
                tracing::error!(item_id = %item.id, error = %e, "Failed to return item to pending");
            }
            if let Err(e) = state.fail(err.summary()).await {
                tracing::error!(error = %e, "Failed to record run failure");
            }
            ItemResolution::Returned
        }
    };

    if let Err(e) = state.resolved(resolution).await {
        tracing::error!(item_id = %item.id, error = %e, "Failed to record item resolution");
    }
}

/// The result could not be written back. The item stays `processing` in the
/// store until recovery returns it, and the run stops.
async fn record_store_failure(
    state: &StateHandle,
    item: &MediaItem,
    err: AppError,
) -> ItemResolution {
    tracing::error!(item_id = %item.id, error = %err, "Failed to record item result");
    if let Err(e) = state
        .fail(format!("Failed to record result for item {}: {}", item.id, err))
        .await
    {
        tracing::error!(error = %e, "Failed to record run failure");
    }
    ItemResolution::Returned
}
