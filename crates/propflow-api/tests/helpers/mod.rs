//! Test helpers: build the router around an in-process migration controller.
//!
//! Run from workspace root: `cargo test -p propflow-api`.

#![allow(dead_code)]

use axum_test::TestServer;
use propflow_api::constants;
use propflow_api::setup::{self, routes};
use propflow_api::StatusResponse;
use propflow_core::{PipelineConfig, StorageBackend};
use propflow_db::{InMemoryItemStore, InMemoryRunStore, ItemStore, RunStore};
use propflow_processing::TranscodeOptions;
use propflow_storage::{LocalStorage, MemoryStorage, Storage, UrlSigner};
use propflow_worker::{ItemPipeline, MigrationControl, SchedulerConfig, SourceFetcher};
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const SIGNING_SECRET: &str = "test-signing-secret-0123456789abcdef";
pub const MEDIA_BASE_URL: &str = "http://localhost:3000/media";

/// API path prefix for tests (e.g. `/api/v0`).
pub fn api_path(path: &str) -> String {
    format!("{}{}", constants::API_PREFIX, path)
}

pub struct TestApp {
    pub server: TestServer,
    pub control: Arc<MigrationControl>,
    pub items: Arc<InMemoryItemStore>,
    /// Source photos and, for the local backend, stored objects.
    pub dir: TempDir,
}

impl TestApp {
    pub fn client(&self) -> &TestServer {
        &self.server
    }

    /// Write a JPEG into the source directory and return its `file://` reference.
    pub fn source_photo(&self, name: &str) -> String {
        let path = self.dir.path().join("source").join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, jpeg(48, 32)).unwrap();
        format!("file://{}", path.display())
    }

    /// Write undecodable bytes under a `.jpg` name.
    pub fn corrupt_photo(&self, name: &str) -> String {
        let path = self.dir.path().join("source").join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"not an image at all").unwrap();
        format!("file://{}", path.display())
    }

    /// Poll the status endpoint until `pred` holds.
    pub async fn wait_for_status<F>(&self, pred: F) -> StatusResponse
    where
        F: Fn(&StatusResponse) -> bool,
    {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
        loop {
            let status: StatusResponse = self
                .server
                .get(&api_path("/migration/status"))
                .await
                .json();
            if pred(&status) {
                return status;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("timed out waiting for status; last: {:?}", status);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

pub fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([200, 180, 150]));
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Jpeg)
        .unwrap();
    buf
}

/// App backed by in-memory stores and in-memory object storage.
pub async fn setup_test_app() -> TestApp {
    build_app(StorageBackend::Memory).await
}

/// App whose objects land on disk and are served from `/media`.
pub async fn setup_local_storage_app() -> TestApp {
    build_app(StorageBackend::Local).await
}

async fn build_app(backend: StorageBackend) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let objects: PathBuf = dir.path().join("objects");

    let config = PipelineConfig {
        storage_backend: backend,
        local_storage_path: Some(objects.display().to_string()),
        local_storage_base_url: Some(MEDIA_BASE_URL.to_string()),
        url_signing_secret: Some(SIGNING_SECRET.to_string()),
        ..PipelineConfig::default()
    };

    let storage: Arc<dyn Storage> = match backend {
        StorageBackend::Local => {
            let signer =
                UrlSigner::new(SIGNING_SECRET.as_bytes(), Duration::from_secs(600)).unwrap();
            Arc::new(
                LocalStorage::new(objects, MEDIA_BASE_URL.to_string(), signer)
                    .await
                    .unwrap(),
            )
        }
        _ => Arc::new(MemoryStorage::new()),
    };

    let items = Arc::new(InMemoryItemStore::new());
    let item_store: Arc<dyn ItemStore> = items.clone();
    let run_store: Arc<dyn RunStore> = Arc::new(InMemoryRunStore::new());

    let pipeline = ItemPipeline::new(
        Arc::new(SourceFetcher::new(Duration::from_secs(5)).unwrap()),
        storage,
        "properties",
        TranscodeOptions::default(),
    );
    let control = MigrationControl::new(
        item_store,
        run_store,
        pipeline,
        SchedulerConfig {
            batch_size: 5,
            pool_size: 2,
            idle_poll: Duration::from_millis(10),
        },
    )
    .await
    .unwrap();
    let control = Arc::new(control);

    let state = setup::build_state(&config, control.clone()).unwrap();
    let app = routes::setup_routes(&config, state).unwrap();
    let server = TestServer::new(app.into_make_service()).expect("Failed to create test server");

    TestApp {
        server,
        control,
        items,
        dir,
    }
}
