//! Enhancement and classification workers.
//!
//! Both wrap a service client with the same policy: a shared concurrency
//! limiter, backoff on rate limits only, and a batch mode that reports
//! progress after every state change.

use crate::retry::{call_with_retry, AttemptLog, RetryPolicy};
use crate::service::{Classifier, EnhancedImage, Enhancer};
use crate::{ConcurrencyLimiter, ServiceError};
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use propflow_core::{BatchProgress, Classification};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

/// One image handed to a worker.
#[derive(Debug, Clone)]
pub struct ImageJob {
    pub item_id: Uuid,
    pub image: Bytes,
    pub content_type: String,
    /// Where the image came from, for logs
    pub source_url: Option<String>,
    pub log: AttemptLog,
}

impl ImageJob {
    pub fn new(item_id: Uuid, image: Bytes, content_type: impl Into<String>) -> Self {
        Self {
            item_id,
            image,
            content_type: content_type.into(),
            source_url: None,
            log: AttemptLog::default(),
        }
    }

    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }
}

/// Result of one job in a batch, returned with the job so callers keep the
/// attempt log.
#[derive(Debug)]
pub struct JobOutcome<T> {
    pub job: ImageJob,
    pub result: Result<T, ServiceError>,
}

#[derive(Debug, Clone)]
pub struct EnhancementWorker {
    enhancer: Arc<dyn Enhancer>,
    limiter: ConcurrencyLimiter,
    policy: RetryPolicy,
}

impl EnhancementWorker {
    pub fn new(enhancer: Arc<dyn Enhancer>, limiter: ConcurrencyLimiter, policy: RetryPolicy) -> Self {
        Self {
            enhancer,
            limiter,
            policy,
        }
    }

    pub async fn process(&self, job: &mut ImageJob) -> Result<EnhancedImage, ServiceError> {
        let start = std::time::Instant::now();
        let image = job.image.clone();
        let content_type = job.content_type.clone();

        let result = call_with_retry(&self.policy, &self.limiter, job.item_id, &mut job.log, || {
            self.enhancer.enhance(image.clone(), &content_type)
        })
        .await;

        log_outcome(self.enhancer.name(), job, &result, start);
        result
    }

    pub async fn process_batch<P>(
        &self,
        jobs: Vec<ImageJob>,
        on_progress: P,
    ) -> Vec<JobOutcome<EnhancedImage>>
    where
        P: Fn(&BatchProgress) + Send + Sync,
    {
        run_batch(jobs, self.limiter.limit(), on_progress, |mut job| async move {
            let result = self.process(&mut job).await;
            JobOutcome { job, result }
        })
        .await
    }
}

#[derive(Debug, Clone)]
pub struct ClassificationWorker {
    classifier: Arc<dyn Classifier>,
    limiter: ConcurrencyLimiter,
    policy: RetryPolicy,
}

impl ClassificationWorker {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        limiter: ConcurrencyLimiter,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            classifier,
            limiter,
            policy,
        }
    }

    /// Classify one image. Labels outside the vocabulary come back as
    /// `other` and confidence is clamped to [0, 1].
    pub async fn process(&self, job: &mut ImageJob) -> Result<Classification, ServiceError> {
        let start = std::time::Instant::now();
        let image = job.image.clone();
        let content_type = job.content_type.clone();

        let result = call_with_retry(&self.policy, &self.limiter, job.item_id, &mut job.log, || {
            self.classifier.classify(image.clone(), &content_type)
        })
        .await
        .map(Classification::from_raw);

        log_outcome(self.classifier.name(), job, &result, start);
        result
    }

    pub async fn process_batch<P>(
        &self,
        jobs: Vec<ImageJob>,
        on_progress: P,
    ) -> Vec<JobOutcome<Classification>>
    where
        P: Fn(&BatchProgress) + Send + Sync,
    {
        run_batch(jobs, self.limiter.limit(), on_progress, |mut job| async move {
            let result = self.process(&mut job).await;
            JobOutcome { job, result }
        })
        .await
    }
}

fn log_outcome<T>(
    service: &'static str,
    job: &ImageJob,
    result: &Result<T, ServiceError>,
    start: std::time::Instant,
) {
    let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
    match result {
        Ok(_) => tracing::debug!(
            item_id = %job.item_id,
            service,
            attempts = job.log.attempts,
            duration_ms,
            "Service call succeeded"
        ),
        Err(e) => tracing::warn!(
            item_id = %job.item_id,
            service,
            attempts = job.log.attempts,
            source_url = job.source_url.as_deref().unwrap_or("-"),
            duration_ms,
            error = %e,
            "Service call failed"
        ),
    }
}

/// Drive `jobs` through `run`, at most `width` at a time, reporting progress
/// when a job starts and when it resolves.
async fn run_batch<T, P, F, Fut>(
    jobs: Vec<ImageJob>,
    width: usize,
    on_progress: P,
    run: F,
) -> Vec<JobOutcome<T>>
where
    P: Fn(&BatchProgress) + Send + Sync,
    F: Fn(ImageJob) -> Fut,
    Fut: Future<Output = JobOutcome<T>>,
{
    let progress = Mutex::new(BatchProgress::new(jobs.len()));
    let report = |update: &dyn Fn(&mut BatchProgress)| {
        let snapshot = {
            let mut guard = progress.lock().unwrap_or_else(PoisonError::into_inner);
            update(&mut guard);
            guard.clone()
        };
        on_progress(&snapshot);
    };

    stream::iter(jobs)
        .map(|job| {
            let report = &report;
            let run = &run;
            async move {
                let item_id = job.item_id;
                report(&|p: &mut BatchProgress| p.current_item = Some(item_id));
                let outcome = run(job).await;
                let ok = outcome.result.is_ok();
                report(&|p: &mut BatchProgress| {
                    if ok {
                        p.completed += 1;
                    } else {
                        p.failed += 1;
                    }
                    p.current_item = Some(item_id);
                });
                outcome
            }
        })
        .buffer_unordered(width.max(1))
        .collect()
        .await
}
