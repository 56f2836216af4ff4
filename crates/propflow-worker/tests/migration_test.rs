//! End-to-end migration scenarios against in-memory stores and fake services.

mod helpers;

use async_trait::async_trait;
use bytes::Bytes;
use helpers::{
    classification_worker, enhancement_worker, FakeClassifier, FakeSource, HarnessBuilder,
    UpscalingEnhancer,
};
use propflow_core::{
    ItemUpdate, MediaItem, MediaStatus, MigrationRun, RoomLabel, RunState,
};
use propflow_db::{InMemoryItemStore, InMemoryRunStore, ItemStore, RunStore};
use propflow_processing::TranscodeOptions;
use propflow_storage::{
    MemoryStorage, Storage, StorageBackend, StorageError, StorageResult, StoredObject,
};
use propflow_worker::StartOutcome;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

fn settled(run: &MigrationRun) -> bool {
    run.processing_count == 0 && !matches!(run.state, RunState::Running)
}

#[tokio::test]
async fn hundred_items_with_rate_limits_and_corrupt_sources() {
    let source = Arc::new(FakeSource::new());
    let classifier = Arc::new(FakeClassifier::new(40..45));
    let harness = HarnessBuilder::new(source.clone())
        .pool_size(2)
        .classification(classification_worker(classifier.clone(), 2))
        .build()
        .await;

    let mut refs: Vec<String> = (0..92).map(|i| format!("photo-{}", i)).collect();
    refs.extend((0..5).map(|i| format!("wide-{}-{}", 40 + i, i)));
    refs.extend((0..3).map(|i| format!("corrupt-{}", i)));
    harness.seed(refs).await;

    let report = harness.control.start().await.unwrap();
    assert_eq!(report.outcome, StartOutcome::Began);
    assert_eq!(report.run.pending_count, 100);

    let run = harness
        .wait_for(|run| run.state == RunState::Completed)
        .await;

    assert_eq!(run.total_items, 100);
    assert_eq!(run.processed_count, 97);
    assert_eq!(run.error_count, 3);
    assert_eq!(run.pending_count, 0);
    assert_eq!(run.processing_count, 0);
    assert!(run.counters_balance());
    assert!(run.completed_at.is_some());

    // Five rate limits, each retried once; corrupt items never reach it.
    assert_eq!(classifier.rate_limited.load(Ordering::SeqCst), 5);
    assert_eq!(classifier.calls(), 97 + 5);
    assert!(classifier.peak.load(Ordering::SeqCst) <= 2);

    let processed = harness
        .items
        .list_by_status(MediaStatus::Processed, 1000)
        .await
        .unwrap();
    assert_eq!(processed.len(), 97);
    for item in &processed {
        assert_eq!(item.ai_primary_label, Some(RoomLabel::Kitchen));
        assert!(item.ai_labels.contains(&RoomLabel::Other));
        assert!(item.processed_path.is_some());
        assert!(item.last_error.is_none());
    }

    let errors = harness
        .items
        .list_by_status(MediaStatus::Error, 1000)
        .await
        .unwrap();
    assert_eq!(errors.len(), 3);
    for item in &errors {
        assert!(item.source_ref.starts_with("corrupt-"));
        assert!(item
            .last_error
            .as_deref()
            .unwrap_or_default()
            .starts_with("transcode"));
    }
}

#[tokio::test]
async fn pool_size_bounds_items_in_flight() {
    let source = Arc::new(FakeSource::new().with_delay(Duration::from_millis(10)));
    let harness = HarnessBuilder::new(source.clone())
        .pool_size(3)
        .batch_size(7)
        .build()
        .await;

    harness
        .seed((0..20).map(|i| format!("photo-{}", i)))
        .await;
    harness.control.start().await.unwrap();
    let run = harness
        .wait_for(|run| run.state == RunState::Completed)
        .await;

    assert_eq!(run.processed_count, 20);
    assert_eq!(source.calls(), 20);
    assert!(source.peak() <= 3, "peak {} exceeds pool", source.peak());
    assert!(source.peak() >= 1);
}

#[tokio::test]
async fn pause_stops_new_dispatch_and_lets_in_flight_finish() {
    let gate = Arc::new(Semaphore::new(0));
    let source = Arc::new(FakeSource::new().with_gate(gate.clone()));
    let harness = HarnessBuilder::new(source.clone())
        .pool_size(2)
        .build()
        .await;

    harness
        .seed((0..10).map(|i| format!("photo-{}", i)))
        .await;
    harness.control.start().await.unwrap();

    // Two items are blocked inside fetch.
    tokio::time::timeout(helpers::WAIT, async {
        while source.calls() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let paused = harness.control.pause().await.unwrap();
    assert_eq!(paused.state, RunState::Paused);
    assert_eq!(paused.processing_count, 2);

    // Pausing twice is a no-op.
    assert_eq!(harness.control.pause().await.unwrap().state, RunState::Paused);

    gate.add_permits(1000);
    let run = harness
        .wait_for(|run| settled(run) && run.processed_count == 2)
        .await;
    assert_eq!(run.state, RunState::Paused);
    assert_eq!(run.pending_count, 8);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(source.calls(), 2);
    let counts = harness.items.count_by_status().await.unwrap();
    assert_eq!(counts.pending, 8);
    assert_eq!(counts.processing, 0);

    let resumed = harness.control.start().await.unwrap();
    assert_eq!(resumed.outcome, StartOutcome::Resumed);
    assert_eq!(resumed.run.started_at, paused.started_at);

    let run = harness
        .wait_for(|run| run.state == RunState::Completed)
        .await;
    assert_eq!(run.processed_count, 10);
    assert_eq!(source.calls(), 10);
}

#[tokio::test]
async fn retry_errors_requeues_without_starting() {
    let source = Arc::new(FakeSource::new());
    let harness = HarnessBuilder::new(source.clone()).build().await;

    harness
        .seed((0..6).map(|i| format!("flaky-{}", i)))
        .await;
    harness.control.start().await.unwrap();
    let run = harness
        .wait_for(|run| run.state == RunState::Completed)
        .await;
    assert_eq!(run.error_count, 6);
    assert_eq!(run.processed_count, 0);

    let report = harness.control.retry_errors().await.unwrap();
    assert_eq!(report.requeued, 6);
    assert_eq!(report.run.state, RunState::Completed);
    assert_eq!(report.run.pending_count, 6);
    assert_eq!(report.run.error_count, 0);
    assert!(report.run.last_updated_at > run.last_updated_at);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(source.calls(), 6);

    let started = harness.control.start().await.unwrap();
    assert_eq!(started.outcome, StartOutcome::Began);
    let run = harness
        .wait_for(|run| run.state == RunState::Completed && run.processed_count == 6)
        .await;
    assert_eq!(run.error_count, 0);
    assert_eq!(run.pending_count, 0);

    for item in harness
        .items
        .list_by_status(MediaStatus::Processed, 100)
        .await
        .unwrap()
    {
        assert_eq!(item.attempts, 2);
        assert!(item.last_error.is_none());
    }

    // Nothing left to retry.
    let report = harness.control.retry_errors().await.unwrap();
    assert_eq!(report.requeued, 0);
}

#[tokio::test]
async fn start_with_empty_queue_completes_immediately() {
    let harness = HarnessBuilder::new(Arc::new(FakeSource::new())).build().await;

    let report = harness.control.start().await.unwrap();
    assert_eq!(report.outcome, StartOutcome::NothingToDo);
    assert_eq!(report.run.state, RunState::Completed);
    assert!(report.run.completed_at.is_some());
    assert_eq!(harness.control.status().state, RunState::Completed);
}

/// Object store that rejects every key, as a misconfigured deployment would.
struct RejectingStorage;

#[async_trait]
impl Storage for RejectingStorage {
    async fn upload(
        &self,
        _namespace: &str,
        _content_type: &str,
        _extension: &str,
        _data: Bytes,
    ) -> StorageResult<StoredObject> {
        Err(StorageError::InvalidPath("namespace resolves outside bucket".to_string()))
    }

    async fn reissue_url(&self, path: &str) -> StorageResult<String> {
        Err(StorageError::NotFound(path.to_string()))
    }

    async fn download(&self, path: &str) -> StorageResult<Bytes> {
        Err(StorageError::NotFound(path.to_string()))
    }

    async fn exists(&self, _path: &str) -> StorageResult<bool> {
        Ok(false)
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        Err(StorageError::InvalidPath(path.to_string()))
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Memory
    }
}

#[tokio::test]
async fn contract_violation_stops_the_run_without_blaming_items() {
    let harness = HarnessBuilder::new(Arc::new(FakeSource::new()))
        .storage(Arc::new(RejectingStorage))
        .pool_size(1)
        .build()
        .await;

    harness
        .seed((0..4).map(|i| format!("photo-{}", i)))
        .await;
    harness.control.start().await.unwrap();

    let run = harness
        .wait_for(|run| run.state == RunState::Error && run.processing_count == 0)
        .await;
    assert!(run
        .last_error
        .as_deref()
        .unwrap_or_default()
        .contains("upload"));

    let counts = harness.items.count_by_status().await.unwrap();
    assert_eq!(counts.error, 0);
    assert_eq!(counts.processed, 0);
    assert_eq!(counts.pending, 4);
}

#[tokio::test]
async fn boot_returns_interrupted_items_and_resumes_running_run() {
    let items = Arc::new(InMemoryItemStore::new());
    let runs = Arc::new(InMemoryRunStore::new());

    let stuck = items
        .insert(MediaItem::new_photo("photo-stuck"))
        .await
        .unwrap();
    items
        .update_status(stuck.id, MediaStatus::Processing, ItemUpdate::default())
        .await
        .unwrap();
    items
        .insert(MediaItem::new_photo("photo-waiting"))
        .await
        .unwrap();

    let crashed = MigrationRun {
        state: RunState::Running,
        total_items: 2,
        pending_count: 1,
        processing_count: 1,
        ..MigrationRun::default()
    };
    runs.save(&crashed).await.unwrap();

    let harness = HarnessBuilder::new(Arc::new(FakeSource::new()))
        .items(items.clone())
        .runs(runs.clone())
        .build()
        .await;

    let run = harness
        .wait_for(|run| run.state == RunState::Completed)
        .await;
    assert_eq!(run.processed_count, 2);

    let recovered = items.get(stuck.id).await.unwrap().unwrap();
    assert_eq!(recovered.status, MediaStatus::Processed);
    assert_eq!(recovered.attempts, 2);

    let persisted = runs.load().await.unwrap().unwrap();
    assert_eq!(persisted.state, RunState::Completed);
}

#[tokio::test]
async fn enhanced_output_larger_than_source_ceiling_is_stored_once() {
    let storage = Arc::new(MemoryStorage::new());
    let enhancer = Arc::new(UpscalingEnhancer::new(600, 400));
    let classifier = Arc::new(FakeClassifier::new(Vec::<u32>::new()));
    let harness = HarnessBuilder::new(Arc::new(FakeSource::new()))
        .storage(storage.clone())
        .transcode(TranscodeOptions {
            max_file_size_bytes: 64 * 1024,
            ..TranscodeOptions::default()
        })
        .enhancement(enhancement_worker(enhancer.clone()))
        .classification(classification_worker(classifier.clone(), 1))
        .build()
        .await;
    assert!(helpers::noisy_png(600, 400).len() > 64 * 1024);

    harness
        .seed((0..3).map(|i| format!("photo-{}", i)))
        .await;
    harness.control.start().await.unwrap();
    let run = harness
        .wait_for(|run| run.state == RunState::Completed)
        .await;

    assert_eq!(run.processed_count, 3);
    assert_eq!(run.error_count, 0);
    assert_eq!(enhancer.calls(), 3);
    assert_eq!(classifier.calls(), 3);

    // Only the enhanced asset survives for each item.
    assert_eq!(storage.len().await, 3);
    let processed = harness
        .items
        .list_by_status(MediaStatus::Processed, 10)
        .await
        .unwrap();
    assert_eq!(processed.len(), 3);
    for item in &processed {
        let path = item.processed_path.as_deref().unwrap();
        let stored = storage.download(path).await.unwrap();
        let img = image::load_from_memory(&stored).unwrap();
        assert_eq!((img.width(), img.height()), (600, 400));
        assert_eq!(storage.content_type(path).await.as_deref(), Some("image/jpeg"));
    }
}

#[tokio::test]
async fn second_controller_on_the_same_stores_is_refused() {
    let items = Arc::new(InMemoryItemStore::new());
    let runs = Arc::new(InMemoryRunStore::new());
    let first = HarnessBuilder::new(Arc::new(FakeSource::new()))
        .items(items.clone())
        .runs(runs.clone())
        .build()
        .await;
    first.seed(["photo-a".to_string()]).await;
    first.control.start().await.unwrap();

    let pipeline = propflow_worker::ItemPipeline::new(
        Arc::new(FakeSource::new()),
        Arc::new(MemoryStorage::new()),
        "properties",
        TranscodeOptions::default(),
    );
    let item_store: Arc<dyn ItemStore> = items.clone();
    let run_store: Arc<dyn RunStore> = runs.clone();
    let second = propflow_worker::MigrationControl::new(
        item_store.clone(),
        run_store.clone(),
        pipeline,
        propflow_worker::SchedulerConfig::default(),
    )
    .await;
    assert!(matches!(second, Err(propflow_core::AppError::Conflict(_))));

    let run = first
        .wait_for(|run| run.state == RunState::Completed)
        .await;
    assert_eq!(run.processed_count, 1);

    // Control passes on once the first controller is gone.
    first.control.shutdown().await;
    drop(first);
    let pipeline = propflow_worker::ItemPipeline::new(
        Arc::new(FakeSource::new()),
        Arc::new(MemoryStorage::new()),
        "properties",
        TranscodeOptions::default(),
    );
    let successor = propflow_worker::MigrationControl::new(
        item_store,
        run_store,
        pipeline,
        propflow_worker::SchedulerConfig::default(),
    )
    .await
    .unwrap();
    assert_eq!(successor.status().processed_count, 1);
    successor.shutdown().await;
}

#[tokio::test]
async fn closed_gate_does_not_leak_in_flight_fetches() {
    use propflow_worker::MediaSource;

    let gate = Arc::new(Semaphore::new(0));
    gate.close();
    let source = FakeSource::new().with_gate(gate);

    assert!(source.fetch("photo-a").await.is_err());
    assert!(source.fetch("photo-b").await.is_err());
    assert_eq!(source.calls(), 2);
    assert_eq!(source.peak(), 1);
}

#[tokio::test]
async fn reissued_url_points_at_the_same_object() {
    let harness = HarnessBuilder::new(Arc::new(FakeSource::new())).build().await;
    let queued = harness
        .control
        .enqueue(vec!["photo-front".to_string()])
        .await
        .unwrap();
    let id = queued[0].id;

    let err = harness.control.reissue_url(id).await.unwrap_err();
    assert!(matches!(err, propflow_core::AppError::Conflict(_)));

    harness.control.start().await.unwrap();
    harness
        .wait_for(|run| run.state == RunState::Completed)
        .await;

    let item = harness.control.item(id).await.unwrap();
    let path = item.processed_path.clone().unwrap();
    let url = harness.control.reissue_url(id).await.unwrap();
    assert!(url.contains(&path));
    assert_ne!(Some(url), item.processed_url);
    assert!(harness.storage.exists(&path).await.unwrap());

    assert!(harness.control.enqueue(vec!["  ".to_string()]).await.is_err());
}

#[tokio::test]
async fn shutdown_waits_for_scheduler() {
    let harness = HarnessBuilder::new(Arc::new(FakeSource::new())).build().await;
    harness.seed((0..3).map(|i| format!("photo-{}", i))).await;
    harness.control.start().await.unwrap();
    harness
        .wait_for(|run| run.state == RunState::Completed)
        .await;

    harness.control.shutdown().await;
    // Idempotent.
    harness.control.shutdown().await;
    assert_eq!(harness.control.status().processed_count, 3);
}
