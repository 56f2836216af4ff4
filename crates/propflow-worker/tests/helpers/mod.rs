//! Test doubles and harness for migration scenario tests.
//!
//! Run with: `cargo test -p propflow-worker --test migration_test`

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use propflow_core::{MigrationRun, RawClassification};
use propflow_db::{InMemoryItemStore, InMemoryRunStore, ItemStore, RunStore};
use propflow_plugins::{
    ClassificationWorker, Classifier, ConcurrencyLimiter, EnhancedImage, EnhancementWorker,
    Enhancer, RetryPolicy, ServiceError,
};
use propflow_processing::TranscodeOptions;
use propflow_storage::{MemoryStorage, Storage};
use propflow_worker::{
    FetchError, FetchedMedia, ItemPipeline, MediaSource, MigrationControl, SchedulerConfig,
};
use std::collections::HashSet;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

pub const WAIT: Duration = Duration::from_secs(30);

/// Small JPEG of the given size.
pub fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([120, 140, 160]));
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Jpeg)
        .unwrap();
    buf
}

/// Serves assets by reference prefix:
/// `corrupt-*` yields undecodable bytes, `flaky-*` fails once with a network
/// error, `wide-<w>-*` yields a JPEG `w` pixels wide, anything else a 32x24 JPEG.
#[derive(Default)]
pub struct FakeSource {
    pub calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub peak: AtomicUsize,
    pub delay: Option<Duration>,
    /// When set, every fetch waits for a permit before returning.
    pub gate: Option<Arc<Semaphore>>,
    seen: Mutex<HashSet<String>>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaSource for FakeSource {
    async fn fetch(&self, source_ref: &str) -> Result<FetchedMedia, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let gated = match &self.gate {
            Some(gate) => gate.acquire().await.map(drop),
            None => Ok(()),
        };
        if gated.is_ok() {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        gated.map_err(|_| FetchError::Unavailable("gate closed".to_string()))?;

        if source_ref.starts_with("flaky-") {
            let first = self.seen.lock().unwrap().insert(source_ref.to_string());
            if first {
                return Err(FetchError::Unavailable(format!("{}: connection reset", source_ref)));
            }
        }

        let data = if source_ref.starts_with("corrupt-") {
            b"definitely not a jpeg".to_vec()
        } else if let Some(rest) = source_ref.strip_prefix("wide-") {
            let width = rest
                .split('-')
                .next()
                .and_then(|w| w.parse().ok())
                .unwrap_or(32);
            jpeg(width, 24)
        } else {
            jpeg(32, 24)
        };

        Ok(FetchedMedia {
            data: Bytes::from(data),
            content_type: Some("image/jpeg".to_string()),
        })
    }
}

/// Classifier that rate-limits the first call for images whose width is in
/// `flaky_widths`, and tracks its own concurrency.
#[derive(Debug, Default)]
pub struct FakeClassifier {
    pub calls: AtomicUsize,
    pub rate_limited: AtomicUsize,
    in_flight: AtomicUsize,
    pub peak: AtomicUsize,
    flaky_widths: HashSet<u32>,
    tripped: Mutex<HashSet<u32>>,
}

impl FakeClassifier {
    pub fn new(flaky_widths: impl IntoIterator<Item = u32>) -> Self {
        Self {
            flaky_widths: flaky_widths.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Classifier for FakeClassifier {
    fn name(&self) -> &'static str {
        "fake-classifier"
    }

    async fn classify(
        &self,
        image: Bytes,
        _content_type: &str,
    ) -> Result<RawClassification, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(2)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let width = image::load_from_memory(&image)
            .map(|img| img.width())
            .unwrap_or(0);
        if self.flaky_widths.contains(&width) && self.tripped.lock().unwrap().insert(width) {
            self.rate_limited.fetch_add(1, Ordering::SeqCst);
            return Err(ServiceError::rate_limited(
                "fake-classifier",
                "429 - rate limit exceeded",
            ));
        }

        Ok(RawClassification {
            primary_label: "Kitchen".to_string(),
            labels: vec!["kitchen".to_string(), "Butler's Pantry".to_string()],
            confidence: 0.9,
            description: Some("Bright kitchen".to_string()),
        })
    }
}

/// Enhancer that answers every photo with a noisy PNG of a fixed size, the
/// way an upscaling model returns images far larger than its input.
#[derive(Debug)]
pub struct UpscalingEnhancer {
    pub calls: AtomicUsize,
    width: u32,
    height: u32,
}

impl UpscalingEnhancer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            width,
            height,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// PNG of pseudo-random pixels, which deflate cannot shrink much.
pub fn noisy_png(width: u32, height: u32) -> Vec<u8> {
    let mut seed: u32 = 0x9e37_79b9;
    let img = image::RgbImage::from_fn(width, height, |_, _| {
        seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        let [r, g, b, _] = seed.to_le_bytes();
        image::Rgb([r, g, b])
    });
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

#[async_trait]
impl Enhancer for UpscalingEnhancer {
    fn name(&self) -> &'static str {
        "upscaling-enhancer"
    }

    async fn enhance(&self, image: Bytes, _content_type: &str) -> Result<EnhancedImage, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if image::load_from_memory(&image).is_err() {
            return Err(ServiceError::invalid_request(
                "upscaling-enhancer",
                "input is not an image",
            ));
        }
        Ok(EnhancedImage {
            data: Bytes::from(noisy_png(self.width, self.height)),
            content_type: "image/png".to_string(),
        })
    }
}

pub fn enhancement_worker(enhancer: Arc<UpscalingEnhancer>) -> EnhancementWorker {
    EnhancementWorker::new(
        enhancer,
        ConcurrencyLimiter::new("upscaling-enhancer", 1),
        fast_retry(),
    )
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        base: Duration::from_millis(5),
        multiplier: 2,
        cap: Duration::from_millis(20),
        max_attempts: 3,
    }
}

pub fn classification_worker(classifier: Arc<FakeClassifier>, limit: usize) -> ClassificationWorker {
    ClassificationWorker::new(
        classifier,
        ConcurrencyLimiter::new("fake-classifier", limit),
        fast_retry(),
    )
}

pub struct Harness {
    pub items: Arc<InMemoryItemStore>,
    pub runs: Arc<InMemoryRunStore>,
    pub storage: Arc<dyn Storage>,
    pub control: MigrationControl,
}

pub struct HarnessBuilder {
    items: Arc<InMemoryItemStore>,
    runs: Arc<InMemoryRunStore>,
    source: Arc<dyn MediaSource>,
    storage: Arc<dyn Storage>,
    transcode: TranscodeOptions,
    enhancement: Option<EnhancementWorker>,
    classification: Option<ClassificationWorker>,
    config: SchedulerConfig,
}

impl HarnessBuilder {
    pub fn new(source: Arc<dyn MediaSource>) -> Self {
        Self {
            items: Arc::new(InMemoryItemStore::new()),
            runs: Arc::new(InMemoryRunStore::new()),
            source,
            storage: Arc::new(MemoryStorage::new()),
            transcode: TranscodeOptions::default(),
            enhancement: None,
            classification: None,
            config: SchedulerConfig {
                batch_size: 10,
                pool_size: 2,
                idle_poll: Duration::from_millis(10),
            },
        }
    }

    pub fn items(mut self, items: Arc<InMemoryItemStore>) -> Self {
        self.items = items;
        self
    }

    pub fn runs(mut self, runs: Arc<InMemoryRunStore>) -> Self {
        self.runs = runs;
        self
    }

    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = storage;
        self
    }

    pub fn transcode(mut self, options: TranscodeOptions) -> Self {
        self.transcode = options;
        self
    }

    pub fn enhancement(mut self, worker: EnhancementWorker) -> Self {
        self.enhancement = Some(worker);
        self
    }

    pub fn classification(mut self, worker: ClassificationWorker) -> Self {
        self.classification = Some(worker);
        self
    }

    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.config.pool_size = pool_size;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.config.batch_size = batch_size;
        self
    }

    pub async fn build(self) -> Harness {
        let pipeline = ItemPipeline::new(
            self.source,
            self.storage.clone(),
            "properties",
            self.transcode,
        )
        .with_enhancement(self.enhancement)
        .with_classification(self.classification);

        let item_store: Arc<dyn ItemStore> = self.items.clone();
        let run_store: Arc<dyn RunStore> = self.runs.clone();
        let control = MigrationControl::new(item_store, run_store, pipeline, self.config)
            .await
            .unwrap();

        Harness {
            items: self.items,
            runs: self.runs,
            storage: self.storage,
            control,
        }
    }
}

impl Harness {
    pub async fn seed(&self, refs: impl IntoIterator<Item = String>) {
        let refs: Vec<String> = refs.into_iter().collect();
        self.control.enqueue(refs).await.unwrap();
    }

    /// Wait until the published run satisfies `pred`.
    pub async fn wait_for<F>(&self, pred: F) -> MigrationRun
    where
        F: Fn(&MigrationRun) -> bool,
    {
        let mut rx = self.control.subscribe();
        let result = tokio::time::timeout(WAIT, async {
            loop {
                {
                    let run = rx.borrow_and_update();
                    if pred(&run) {
                        return run.clone();
                    }
                }
                rx.changed().await.unwrap();
            }
        })
        .await;
        match result {
            Ok(run) => run,
            Err(_) => panic!(
                "timed out waiting for run state; last snapshot: {:?}",
                self.control.status()
            ),
        }
    }
}
