//! Per-item pipeline error types
//!
//! Every stage of the per-item pipeline (fetch, transcode, upload, enhance,
//! classify) reports failures as an [`ItemError`]. The kind decides what the
//! scheduler does next: record the item as `error`, or stop the whole run
//! because the pipeline itself is misconfigured.

use std::fmt;

/// Classification of a per-item failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemErrorKind {
    /// Bad input (unsupported format, oversized file, missing source).
    /// Marked `error`, never retried automatically.
    Validation,
    /// Network or storage blip. Marked `error`, eligible for retry-errors.
    Transient,
    /// External rate limit that outlasted the in-process backoff.
    RateLimited,
    /// Programmer or contract error. Not the item's fault; stops the run.
    Fatal,
}

impl ItemErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemErrorKind::Validation => "validation",
            ItemErrorKind::Transient => "transient",
            ItemErrorKind::RateLimited => "rate_limited",
            ItemErrorKind::Fatal => "fatal",
        }
    }
}

/// Error produced while moving one item through the pipeline.
#[derive(Debug)]
pub struct ItemError {
    kind: ItemErrorKind,
    stage: &'static str,
    inner: anyhow::Error,
}

impl ItemError {
    pub fn new(kind: ItemErrorKind, stage: &'static str, err: impl Into<anyhow::Error>) -> Self {
        Self {
            kind,
            stage,
            inner: err.into(),
        }
    }

    pub fn validation(stage: &'static str, err: impl Into<anyhow::Error>) -> Self {
        Self::new(ItemErrorKind::Validation, stage, err)
    }

    pub fn transient(stage: &'static str, err: impl Into<anyhow::Error>) -> Self {
        Self::new(ItemErrorKind::Transient, stage, err)
    }

    pub fn rate_limited(stage: &'static str, err: impl Into<anyhow::Error>) -> Self {
        Self::new(ItemErrorKind::RateLimited, stage, err)
    }

    pub fn fatal(stage: &'static str, err: impl Into<anyhow::Error>) -> Self {
        Self::new(ItemErrorKind::Fatal, stage, err)
    }

    pub fn kind(&self) -> ItemErrorKind {
        self.kind
    }

    /// Pipeline stage that failed (`fetch`, `transcode`, `upload`, ...).
    pub fn stage(&self) -> &'static str {
        self.stage
    }

    /// Whether the failure is the item's own and belongs in its `error` status.
    pub fn is_item_failure(&self) -> bool {
        self.kind != ItemErrorKind::Fatal
    }

    pub fn inner(&self) -> &anyhow::Error {
        &self.inner
    }

    /// Root cause chain flattened to one line, for `last_error` columns.
    pub fn summary(&self) -> String {
        format!("{}: {:#}", self.stage, self.inner)
    }
}

impl fmt::Display for ItemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed ({}): {}", self.stage, self.kind.as_str(), self.inner)
    }
}

impl std::error::Error for ItemError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

/// Extension trait to tag a stage result with an error kind.
pub trait ItemResultExt<T> {
    fn item_err(self, kind: ItemErrorKind, stage: &'static str) -> Result<T, ItemError>;
}

impl<T, E: Into<anyhow::Error>> ItemResultExt<T> for Result<T, E> {
    fn item_err(self, kind: ItemErrorKind, stage: &'static str) -> Result<T, ItemError> {
        self.map_err(|e| ItemError::new(kind, stage, e))
    }
}
