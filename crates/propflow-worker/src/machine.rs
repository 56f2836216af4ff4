//! Run-level state machine.
//!
//! Pure transitions over [`MigrationRun`]. The state actor is the only caller,
//! which keeps every mutation serialized.
//!
//! ```text
//! idle ──start──▶ running ──pause──▶ paused ──start──▶ running
//!                   │  └──queue drained──▶ completed ──start──▶ running
//!                   └──fatal──▶ error ──start──▶ running
//! ```

use chrono::{DateTime, Utc};
use propflow_core::{MigrationRun, RunState, StatusCounts};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("cannot {action} a run that is {state}")]
    Invalid {
        state: RunState,
        action: &'static str,
    },
}

/// What a `start` command did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Already running; nothing changed.
    AlreadyRunning,
    /// Paused run picked up where it stopped.
    Resumed,
    /// Fresh run over the current queue.
    Began,
    /// Nothing pending, so the run went straight to `completed`.
    NothingToDo,
}

/// Apply `start`. Counters are refreshed from `counts` in every case but
/// `AlreadyRunning`.
pub fn start(run: &mut MigrationRun, counts: StatusCounts, now: DateTime<Utc>) -> StartOutcome {
    let outcome = match run.state {
        RunState::Running => return StartOutcome::AlreadyRunning,
        RunState::Paused => {
            run.reconcile(counts);
            StartOutcome::Resumed
        }
        RunState::Idle | RunState::Completed | RunState::Error => {
            run.reconcile(counts);
            run.started_at = Some(now);
            run.completed_at = None;
            run.last_error = None;
            StartOutcome::Began
        }
    };

    if run.has_work() {
        run.state = RunState::Running;
        touch(run, now);
        outcome
    } else {
        if run.started_at.is_none() {
            run.started_at = Some(now);
        }
        run.state = RunState::Completed;
        run.completed_at = Some(now);
        touch(run, now);
        StartOutcome::NothingToDo
    }
}

/// Apply `pause`. Returns whether anything changed.
pub fn pause(run: &mut MigrationRun, now: DateTime<Utc>) -> bool {
    if run.state != RunState::Running {
        return false;
    }
    run.state = RunState::Paused;
    touch(run, now);
    true
}

/// The scheduler found the queue empty with nothing in flight.
pub fn complete(run: &mut MigrationRun, now: DateTime<Utc>) -> Result<(), TransitionError> {
    if run.state != RunState::Running {
        return Err(TransitionError::Invalid {
            state: run.state,
            action: "complete",
        });
    }
    run.state = RunState::Completed;
    run.completed_at = Some(now);
    touch(run, now);
    Ok(())
}

/// A run-level failure: the pipeline itself is broken, not an item.
pub fn fail(
    run: &mut MigrationRun,
    reason: impl Into<String>,
    now: DateTime<Utc>,
) -> Result<(), TransitionError> {
    if !matches!(run.state, RunState::Running | RunState::Paused) {
        return Err(TransitionError::Invalid {
            state: run.state,
            action: "fail",
        });
    }
    run.state = RunState::Error;
    run.last_error = Some(reason.into());
    touch(run, now);
    Ok(())
}

/// Refresh `last_updated_at`, never moving it backwards.
pub fn touch(run: &mut MigrationRun, now: DateTime<Utc>) {
    run.last_updated_at = Some(match run.last_updated_at {
        Some(prev) if prev >= now => prev + chrono::Duration::microseconds(1),
        _ => now,
    });
}
