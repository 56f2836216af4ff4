use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use super::media::StatusCounts;

/// Top-level control-plane state of the migration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Paused,
    Completed,
    Error,
}

impl RunState {
    /// States from which `start` begins a fresh run rather than resuming.
    pub fn is_terminal_or_idle(self) -> bool {
        matches!(self, RunState::Idle | RunState::Completed | RunState::Error)
    }
}

impl Display for RunState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            RunState::Idle => write!(f, "idle"),
            RunState::Running => write!(f, "running"),
            RunState::Paused => write!(f, "paused"),
            RunState::Completed => write!(f, "completed"),
            RunState::Error => write!(f, "error"),
        }
    }
}

impl FromStr for RunState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(RunState::Idle),
            "running" => Ok(RunState::Running),
            "paused" => Ok(RunState::Paused),
            "completed" => Ok(RunState::Completed),
            "error" => Ok(RunState::Error),
            _ => Err(anyhow::anyhow!("Invalid run state: {}", s)),
        }
    }
}

/// Singleton aggregate describing the current (or last) migration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRun {
    pub state: RunState,
    pub total_items: i64,
    pub processed_count: i64,
    pub pending_count: i64,
    pub error_count: i64,
    pub processing_count: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_updated_at: Option<DateTime<Utc>>,
    /// Cause of the last run-level failure. Item failures never land here.
    pub last_error: Option<String>,
}

impl MigrationRun {
    /// Replace all counters with values read from the item store.
    pub fn reconcile(&mut self, counts: StatusCounts) {
        self.total_items = counts.total();
        self.pending_count = counts.pending;
        self.processing_count = counts.processing;
        self.processed_count = counts.processed;
        self.error_count = counts.error;
    }

    pub fn counters_balance(&self) -> bool {
        self.processed_count + self.pending_count + self.error_count + self.processing_count
            == self.total_items
    }

    pub fn has_work(&self) -> bool {
        self.pending_count > 0 || self.processing_count > 0
    }
}
