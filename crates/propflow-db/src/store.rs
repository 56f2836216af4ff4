use async_trait::async_trait;
use propflow_core::{AppError, ItemUpdate, MediaItem, MediaStatus, MigrationRun, StatusCounts};
use std::any::Any;
use std::sync::Mutex;
use uuid::Uuid;

/// Per-item status records.
///
/// Only photo items are ever listed or counted; videos stay in the store
/// untouched. Status changes are conditional on the current status being an
/// allowed predecessor, so a stale writer cannot move an item backwards.
#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn insert(&self, item: MediaItem) -> Result<MediaItem, AppError>;

    async fn get(&self, id: Uuid) -> Result<Option<MediaItem>, AppError>;

    /// Oldest pending photos first.
    async fn list_pending(&self, limit: usize) -> Result<Vec<MediaItem>, AppError>;

    async fn list_by_status(
        &self,
        status: MediaStatus,
        limit: usize,
    ) -> Result<Vec<MediaItem>, AppError>;

    /// Returns `NotFound` for an unknown id and `Conflict` when the current
    /// status may not move to `status`.
    async fn update_status(
        &self,
        id: Uuid,
        status: MediaStatus,
        update: ItemUpdate,
    ) -> Result<MediaItem, AppError>;

    async fn count_by_status(&self) -> Result<StatusCounts, AppError>;

    /// Move every `error` photo back to `pending`. Returns how many moved.
    async fn requeue_errors(&self) -> Result<u64, AppError>;

    /// Move every `processing` photo back to `pending`. Used on boot, when
    /// nothing can legitimately be in flight.
    async fn reset_processing(&self) -> Result<u64, AppError>;
}

/// Persistence for the singleton [`MigrationRun`].
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn load(&self) -> Result<Option<MigrationRun>, AppError>;

    async fn save(&self, run: &MigrationRun) -> Result<(), AppError>;

    /// Claim the right to drive the run. At most one lease exists per store
    /// at a time; a second claim fails with `Conflict` until the holder drops
    /// its lease.
    async fn acquire_control(&self) -> Result<ControlLease, AppError>;
}

/// Exclusive control of the run, released on drop.
pub struct ControlLease {
    _guard: Mutex<Box<dyn Any + Send>>,
}

impl ControlLease {
    pub fn new(guard: impl Any + Send) -> Self {
        Self {
            _guard: Mutex::new(Box::new(guard)),
        }
    }
}

impl std::fmt::Debug for ControlLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlLease").finish_non_exhaustive()
    }
}

pub(crate) fn control_conflict() -> AppError {
    AppError::Conflict(
        "Another process already controls the migration run".to_string(),
    )
}

/// A processed item must carry the path it was stored under.
pub(crate) fn ensure_update_consistent(
    id: Uuid,
    status: MediaStatus,
    update: &ItemUpdate,
) -> Result<(), AppError> {
    if status == MediaStatus::Processed
        && update.processed_path.as_deref().map_or(true, str::is_empty)
    {
        return Err(AppError::InvalidInput(format!(
            "Item {} cannot be marked processed without a processed path",
            id
        )));
    }
    Ok(())
}
