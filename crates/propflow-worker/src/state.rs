//! Single owner of the [`MigrationRun`].
//!
//! Every counter and state change is a message to one actor task, so
//! concurrent item tasks never race on the aggregate. After each change the
//! actor persists the run and publishes a snapshot on a `watch` channel;
//! status reads take that snapshot and never wait on the pipeline.

use crate::machine::{self, StartOutcome, TransitionError};
use chrono::Utc;
use propflow_core::{AppError, MigrationRun, RunState, StatusCounts};
use propflow_db::RunStore;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

const COMMAND_BUFFER: usize = 256;

/// How an in-flight item left `processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemResolution {
    Processed,
    Failed,
    /// Put back to `pending` without blame (fatal pipeline error).
    Returned,
}

enum Command {
    Start {
        counts: StatusCounts,
        reply: oneshot::Sender<(StartOutcome, MigrationRun)>,
    },
    Pause {
        reply: oneshot::Sender<MigrationRun>,
    },
    TryDispatch {
        reply: oneshot::Sender<bool>,
    },
    Resolved {
        resolution: ItemResolution,
    },
    Requeued {
        count: u64,
        reply: oneshot::Sender<MigrationRun>,
    },
    Enqueued {
        count: u64,
        reply: oneshot::Sender<MigrationRun>,
    },
    Reconcile {
        counts: StatusCounts,
        reply: oneshot::Sender<MigrationRun>,
    },
    Complete {
        reply: oneshot::Sender<Result<MigrationRun, TransitionError>>,
    },
    Fail {
        reason: String,
        reply: oneshot::Sender<Result<MigrationRun, TransitionError>>,
    },
}

struct StateActor {
    run: MigrationRun,
    store: Arc<dyn RunStore>,
    publish: watch::Sender<MigrationRun>,
}

impl StateActor {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(command) = rx.recv().await {
            self.handle(command).await;
        }
        tracing::debug!("Migration state actor stopped");
    }

    async fn handle(&mut self, command: Command) {
        let now = Utc::now();
        match command {
            Command::Start { counts, reply } => {
                let outcome = machine::start(&mut self.run, counts, now);
                if outcome != StartOutcome::AlreadyRunning {
                    tracing::info!(
                        outcome = ?outcome,
                        pending = self.run.pending_count,
                        total = self.run.total_items,
                        "Migration run started"
                    );
                    self.commit().await;
                }
                let _ = reply.send((outcome, self.run.clone()));
            }
            Command::Pause { reply } => {
                if machine::pause(&mut self.run, now) {
                    tracing::info!("Migration run paused");
                    self.commit().await;
                }
                let _ = reply.send(self.run.clone());
            }
            Command::TryDispatch { reply } => {
                let allowed = self.run.state == RunState::Running;
                if allowed {
                    self.run.pending_count -= 1;
                    self.run.processing_count += 1;
                    machine::touch(&mut self.run, now);
                    self.commit().await;
                }
                let _ = reply.send(allowed);
            }
            Command::Resolved { resolution } => {
                self.run.processing_count -= 1;
                match resolution {
                    ItemResolution::Processed => self.run.processed_count += 1,
                    ItemResolution::Failed => self.run.error_count += 1,
                    ItemResolution::Returned => self.run.pending_count += 1,
                }
                machine::touch(&mut self.run, now);
                self.commit().await;
            }
            Command::Requeued { count, reply } => {
                let count = i64::try_from(count).unwrap_or(i64::MAX);
                self.run.error_count -= count;
                self.run.pending_count += count;
                machine::touch(&mut self.run, now);
                self.commit().await;
                let _ = reply.send(self.run.clone());
            }
            Command::Enqueued { count, reply } => {
                let count = i64::try_from(count).unwrap_or(i64::MAX);
                self.run.total_items += count;
                self.run.pending_count += count;
                machine::touch(&mut self.run, now);
                self.commit().await;
                let _ = reply.send(self.run.clone());
            }
            Command::Reconcile { counts, reply } => {
                if !self.run.counters_balance() || self.counters_differ(&counts) {
                    tracing::debug!(
                        pending = counts.pending,
                        processing = counts.processing,
                        processed = counts.processed,
                        error = counts.error,
                        "Counters reconciled from item store"
                    );
                }
                self.run.reconcile(counts);
                machine::touch(&mut self.run, now);
                self.commit().await;
                let _ = reply.send(self.run.clone());
            }
            Command::Complete { reply } => {
                let result = machine::complete(&mut self.run, now).map(|_| self.run.clone());
                if result.is_ok() {
                    tracing::info!(
                        processed = self.run.processed_count,
                        errors = self.run.error_count,
                        "Migration run completed"
                    );
                    self.commit().await;
                }
                let _ = reply.send(result);
            }
            Command::Fail { reason, reply } => {
                let result = machine::fail(&mut self.run, reason, now).map(|_| self.run.clone());
                if result.is_ok() {
                    tracing::error!(
                        last_error = self.run.last_error.as_deref().unwrap_or(""),
                        "Migration run failed"
                    );
                    self.commit().await;
                }
                let _ = reply.send(result);
            }
        }
    }

    fn counters_differ(&self, counts: &StatusCounts) -> bool {
        self.run.pending_count != counts.pending
            || self.run.processing_count != counts.processing
            || self.run.processed_count != counts.processed
            || self.run.error_count != counts.error
    }

    /// Persist, then publish. A failed save is logged and retried implicitly
    /// by the next change; the in-memory run stays authoritative.
    async fn commit(&mut self) {
        if let Err(e) = self.store.save(&self.run).await {
            tracing::error!(error = %e, "Failed to persist migration run");
        }
        self.publish.send_replace(self.run.clone());
    }
}

/// Cheap, cloneable handle to the state actor.
#[derive(Clone)]
pub struct StateHandle {
    tx: mpsc::Sender<Command>,
    snapshot: watch::Receiver<MigrationRun>,
}

impl StateHandle {
    /// Load the persisted run (creating an idle one if none exists) and
    /// start the actor.
    pub async fn spawn(store: Arc<dyn RunStore>) -> Result<(Self, JoinHandle<()>), AppError> {
        let run = match store.load().await? {
            Some(run) => run,
            None => {
                let run = MigrationRun::default();
                store.save(&run).await?;
                run
            }
        };

        let (publish, snapshot) = watch::channel(run.clone());
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let actor = StateActor {
            run,
            store,
            publish,
        };
        let handle = tokio::spawn(actor.run(rx));

        Ok((Self { tx, snapshot }, handle))
    }

    /// Latest published run. Never blocks.
    pub fn snapshot(&self) -> MigrationRun {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<MigrationRun> {
        self.snapshot.clone()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, AppError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| AppError::Unavailable("state actor stopped".to_string()))?;
        rx.await
            .map_err(|_| AppError::Unavailable("state actor dropped the request".to_string()))
    }

    pub async fn start(&self, counts: StatusCounts) -> Result<(StartOutcome, MigrationRun), AppError> {
        self.request(|reply| Command::Start { counts, reply }).await
    }

    pub async fn pause(&self) -> Result<MigrationRun, AppError> {
        self.request(|reply| Command::Pause { reply }).await
    }

    /// Ask to move one item from pending to processing. `false` means the run
    /// is no longer running and nothing more may be dispatched.
    pub async fn try_dispatch(&self) -> Result<bool, AppError> {
        self.request(|reply| Command::TryDispatch { reply }).await
    }

    pub async fn resolved(&self, resolution: ItemResolution) -> Result<(), AppError> {
        self.tx
            .send(Command::Resolved { resolution })
            .await
            .map_err(|_| AppError::Unavailable("state actor stopped".to_string()))
    }

    pub async fn requeued(&self, count: u64) -> Result<MigrationRun, AppError> {
        self.request(|reply| Command::Requeued { count, reply }).await
    }

    pub async fn enqueued(&self, count: u64) -> Result<MigrationRun, AppError> {
        self.request(|reply| Command::Enqueued { count, reply }).await
    }

    /// Overwrite counters with item store truth. Only meaningful when no
    /// item task is between its store write and its `resolved` message.
    pub async fn reconcile(&self, counts: StatusCounts) -> Result<MigrationRun, AppError> {
        self.request(|reply| Command::Reconcile { counts, reply }).await
    }

    /// Returns `Ok(false)` if the run is no longer running.
    pub async fn complete(&self) -> Result<bool, AppError> {
        match self.request(|reply| Command::Complete { reply }).await? {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::debug!(error = %e, "Completion skipped");
                Ok(false)
            }
        }
    }

    /// Move the run to `error`. Returns `Ok(false)` if it was not active.
    pub async fn fail(&self, reason: impl Into<String>) -> Result<bool, AppError> {
        let reason = reason.into();
        match self.request(|reply| Command::Fail { reason, reply }).await? {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::debug!(error = %e, "Failure transition skipped");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use propflow_db::InMemoryRunStore;

    fn pending(n: i64) -> StatusCounts {
        StatusCounts {
            pending: n,
            ..StatusCounts::default()
        }
    }

    #[tokio::test]
    async fn first_spawn_persists_idle_run() {
        let store = Arc::new(InMemoryRunStore::new());
        let (state, _task) = StateHandle::spawn(store.clone()).await.unwrap();

        assert_eq!(state.snapshot().state, RunState::Idle);
        assert_eq!(store.load().await.unwrap(), Some(MigrationRun::default()));
    }

    #[tokio::test]
    async fn dispatch_only_while_running() {
        let (state, _task) = StateHandle::spawn(Arc::new(InMemoryRunStore::new()))
            .await
            .unwrap();

        assert!(!state.try_dispatch().await.unwrap());

        state.start(pending(2)).await.unwrap();
        assert!(state.try_dispatch().await.unwrap());
        state.pause().await.unwrap();
        assert!(!state.try_dispatch().await.unwrap());

        let run = state.snapshot();
        assert_eq!(run.pending_count, 1);
        assert_eq!(run.processing_count, 1);
        assert!(run.counters_balance());
    }

    #[tokio::test]
    async fn concurrent_resolutions_keep_counters_balanced() {
        let (state, _task) = StateHandle::spawn(Arc::new(InMemoryRunStore::new()))
            .await
            .unwrap();
        state.start(pending(50)).await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..50 {
            let state = state.clone();
            tasks.push(tokio::spawn(async move {
                assert!(state.try_dispatch().await.unwrap());
                let resolution = if i % 5 == 0 {
                    ItemResolution::Failed
                } else {
                    ItemResolution::Processed
                };
                state.resolved(resolution).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        // round trip through the actor so every resolution has been applied
        let run = state.pause().await.unwrap();
        assert_eq!(run.processed_count, 40);
        assert_eq!(run.error_count, 10);
        assert_eq!(run.pending_count, 0);
        assert_eq!(run.processing_count, 0);
        assert!(run.counters_balance());
    }

    #[tokio::test]
    async fn requeue_moves_errors_to_pending_without_starting() {
        let store = Arc::new(InMemoryRunStore::new());
        let (state, _task) = StateHandle::spawn(store.clone()).await.unwrap();
        state
            .start(StatusCounts {
                pending: 0,
                processing: 0,
                processed: 7,
                error: 3,
            })
            .await
            .unwrap();
        let completed = state.snapshot();
        assert_eq!(completed.state, RunState::Completed);

        let run = state.requeued(3).await.unwrap();
        assert_eq!(run.state, RunState::Completed);
        assert_eq!(run.error_count, 0);
        assert_eq!(run.pending_count, 3);
        assert!(run.last_updated_at > completed.last_updated_at);
        assert_eq!(store.load().await.unwrap(), Some(run));
    }

    #[tokio::test]
    async fn fail_only_from_active_run() {
        let (state, _task) = StateHandle::spawn(Arc::new(InMemoryRunStore::new()))
            .await
            .unwrap();
        assert!(!state.fail("boom").await.unwrap());

        state.start(pending(1)).await.unwrap();
        assert!(state.fail("boom").await.unwrap());
        let run = state.snapshot();
        assert_eq!(run.state, RunState::Error);
        assert_eq!(run.last_error.as_deref(), Some("boom"));
    }
}
