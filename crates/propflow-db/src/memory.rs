//! In-process stores, used when no `DATABASE_URL` is configured and in tests.

use crate::store::{control_conflict, ensure_update_consistent, ControlLease, ItemStore, RunStore};
use async_trait::async_trait;
use chrono::Utc;
use propflow_core::{
    AppError, ItemUpdate, MediaItem, MediaStatus, MediaType, MigrationRun, StatusCounts,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct InMemoryItemStore {
    items: RwLock<HashMap<Uuid, MediaItem>>,
}

impl InMemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn photos_with_status(&self, status: MediaStatus, limit: usize) -> Vec<MediaItem> {
        let items = self.items.read().await;
        let mut matching: Vec<MediaItem> = items
            .values()
            .filter(|i| i.media_type == MediaType::Photo && i.status == status)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        matching.truncate(limit);
        matching
    }

    async fn move_all(&self, from: MediaStatus, to: MediaStatus) -> u64 {
        let now = Utc::now();
        let mut items = self.items.write().await;
        let mut moved = 0;
        for item in items
            .values_mut()
            .filter(|i| i.media_type == MediaType::Photo && i.status == from)
        {
            item.apply(to, ItemUpdate::default(), now);
            moved += 1;
        }
        moved
    }
}

#[async_trait]
impl ItemStore for InMemoryItemStore {
    async fn insert(&self, item: MediaItem) -> Result<MediaItem, AppError> {
        let mut items = self.items.write().await;
        if items.contains_key(&item.id) {
            return Err(AppError::Conflict(format!("Item {} already exists", item.id)));
        }
        items.insert(item.id, item.clone());
        Ok(item)
    }

    async fn get(&self, id: Uuid) -> Result<Option<MediaItem>, AppError> {
        Ok(self.items.read().await.get(&id).cloned())
    }

    async fn list_pending(&self, limit: usize) -> Result<Vec<MediaItem>, AppError> {
        Ok(self.photos_with_status(MediaStatus::Pending, limit).await)
    }

    async fn list_by_status(
        &self,
        status: MediaStatus,
        limit: usize,
    ) -> Result<Vec<MediaItem>, AppError> {
        Ok(self.photos_with_status(status, limit).await)
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: MediaStatus,
        update: ItemUpdate,
    ) -> Result<MediaItem, AppError> {
        ensure_update_consistent(id, status, &update)?;

        let mut items = self.items.write().await;
        let item = items
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Item {} not found", id)))?;

        if !item.status.can_transition_to(status) {
            return Err(AppError::Conflict(format!(
                "Item {} cannot move from {} to {}",
                id, item.status, status
            )));
        }

        item.apply(status, update, Utc::now());
        Ok(item.clone())
    }

    async fn count_by_status(&self) -> Result<StatusCounts, AppError> {
        let items = self.items.read().await;
        let mut counts = StatusCounts::default();
        for item in items.values().filter(|i| i.media_type == MediaType::Photo) {
            counts.add(item.status, 1);
        }
        Ok(counts)
    }

    async fn requeue_errors(&self) -> Result<u64, AppError> {
        Ok(self.move_all(MediaStatus::Error, MediaStatus::Pending).await)
    }

    async fn reset_processing(&self) -> Result<u64, AppError> {
        Ok(self
            .move_all(MediaStatus::Processing, MediaStatus::Pending)
            .await)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryRunStore {
    run: RwLock<Option<MigrationRun>>,
    controlled: Arc<AtomicBool>,
}

struct MemoryLease(Arc<AtomicBool>);

impl Drop for MemoryLease {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn load(&self) -> Result<Option<MigrationRun>, AppError> {
        Ok(self.run.read().await.clone())
    }

    async fn save(&self, run: &MigrationRun) -> Result<(), AppError> {
        *self.run.write().await = Some(run.clone());
        Ok(())
    }

    async fn acquire_control(&self) -> Result<ControlLease, AppError> {
        self.controlled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| control_conflict())?;
        Ok(ControlLease::new(MemoryLease(self.controlled.clone())))
    }
}
