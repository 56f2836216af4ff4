use crate::store::{control_conflict, ControlLease, RunStore};
use async_trait::async_trait;
use propflow_core::{AppError, MigrationRun, RunState};
use sqlx::{PgPool, Row};
use std::str::FromStr;

/// Session advisory lock key held by the controlling process.
const CONTROL_LOCK_KEY: i64 = 0x7072_6f70_666c_6f77;

/// Stores the singleton run as row `id = 1`.
#[derive(Clone)]
pub struct PostgresRunStore {
    pool: PgPool,
}

impl PostgresRunStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn db_error(e: sqlx::Error) -> AppError {
    tracing::error!(error = ?e, "Run store query failed");
    AppError::Database(e.to_string())
}

#[async_trait]
impl RunStore for PostgresRunStore {
    async fn load(&self) -> Result<Option<MigrationRun>, AppError> {
        let row = sqlx::query(
            r#"
            SELECT state, total_items, processed_count, pending_count, error_count,
                processing_count, started_at, completed_at, last_updated_at, last_error
            FROM migration_runs
            WHERE id = 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let state: String = row.try_get("state").map_err(db_error)?;
        Ok(Some(MigrationRun {
            state: RunState::from_str(&state)
                .map_err(|e| AppError::Database(e.to_string()))?,
            total_items: row.try_get("total_items").map_err(db_error)?,
            processed_count: row.try_get("processed_count").map_err(db_error)?,
            pending_count: row.try_get("pending_count").map_err(db_error)?,
            error_count: row.try_get("error_count").map_err(db_error)?,
            processing_count: row.try_get("processing_count").map_err(db_error)?,
            started_at: row.try_get("started_at").map_err(db_error)?,
            completed_at: row.try_get("completed_at").map_err(db_error)?,
            last_updated_at: row.try_get("last_updated_at").map_err(db_error)?,
            last_error: row.try_get("last_error").map_err(db_error)?,
        }))
    }

    #[tracing::instrument(skip(self, run), fields(
        db.system = "postgresql",
        db.table = "migration_runs",
        db.operation = "upsert",
        state = %run.state
    ))]
    async fn save(&self, run: &MigrationRun) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO migration_runs (
                id, state, total_items, processed_count, pending_count, error_count,
                processing_count, started_at, completed_at, last_updated_at, last_error
            )
            VALUES (1, $1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                state = EXCLUDED.state,
                total_items = EXCLUDED.total_items,
                processed_count = EXCLUDED.processed_count,
                pending_count = EXCLUDED.pending_count,
                error_count = EXCLUDED.error_count,
                processing_count = EXCLUDED.processing_count,
                started_at = EXCLUDED.started_at,
                completed_at = EXCLUDED.completed_at,
                last_updated_at = EXCLUDED.last_updated_at,
                last_error = EXCLUDED.last_error
            "#,
        )
        .bind(run.state.to_string())
        .bind(run.total_items)
        .bind(run.processed_count)
        .bind(run.pending_count)
        .bind(run.error_count)
        .bind(run.processing_count)
        .bind(run.started_at)
        .bind(run.completed_at)
        .bind(run.last_updated_at)
        .bind(run.last_error.as_deref())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    /// Takes a session-level advisory lock on a connection detached from the
    /// pool. The lock lives as long as that connection, so dropping the lease
    /// (or the process dying) releases it.
    async fn acquire_control(&self) -> Result<ControlLease, AppError> {
        let mut conn = self.pool.acquire().await.map_err(db_error)?.detach();
        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(CONTROL_LOCK_KEY)
            .fetch_one(&mut conn)
            .await
            .map_err(db_error)?;

        if !acquired {
            tracing::warn!("Migration run is controlled by another process");
            return Err(control_conflict());
        }
        tracing::info!("Acquired migration control lock");
        Ok(ControlLease::new(conn))
    }
}
