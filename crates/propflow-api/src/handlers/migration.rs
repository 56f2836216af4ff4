//! Migration control endpoints: start, pause, retry-errors and status.

use crate::error::HttpAppError;
use crate::state::AppState;
use axum::{extract::State, response::Json};
use chrono::{DateTime, Utc};
use propflow_core::MigrationRun;
use propflow_worker::StartOutcome;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

/// Migration progress as reported to operators.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    /// One of `idle`, `running`, `paused`, `completed`, `error`
    pub status: String,
    pub total_photos: i64,
    pub processed_photos: i64,
    pub pending_photos: i64,
    pub error_photos: i64,
    pub processing_photos: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_updated_at: Option<DateTime<Utc>>,
    /// Cause of the last run-level failure
    pub last_error: Option<String>,
}

impl From<MigrationRun> for StatusResponse {
    fn from(run: MigrationRun) -> Self {
        Self {
            status: run.state.to_string(),
            total_photos: run.total_items,
            processed_photos: run.processed_count,
            pending_photos: run.pending_count,
            error_photos: run.error_count,
            processing_photos: run.processing_count,
            started_at: run.started_at,
            completed_at: run.completed_at,
            last_updated_at: run.last_updated_at,
            last_error: run.last_error,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    /// `began`, `resumed`, `already_running` or `nothing_to_do`
    pub outcome: String,
    #[serde(flatten)]
    pub status: StatusResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetryErrorsResponse {
    /// Items moved from `error` back to `pending`
    pub requeued: u64,
    #[serde(flatten)]
    pub status: StatusResponse,
}

fn outcome_name(outcome: StartOutcome) -> &'static str {
    match outcome {
        StartOutcome::Began => "began",
        StartOutcome::Resumed => "resumed",
        StartOutcome::AlreadyRunning => "already_running",
        StartOutcome::NothingToDo => "nothing_to_do",
    }
}

/// Start the migration, or resume it when paused
#[utoipa::path(
    post,
    path = "/api/v0/migration/start",
    tag = "migration",
    responses(
        (status = 200, description = "Run started, resumed or already running", body = StartResponse),
        (status = 503, description = "Migration controller unavailable", body = crate::error::ErrorResponse)
    )
)]
#[tracing::instrument(skip(state))]
pub async fn start_migration(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StartResponse>, HttpAppError> {
    let report = state.control.start().await?;
    tracing::info!(
        outcome = outcome_name(report.outcome),
        pending = report.run.pending_count,
        "Migration start requested"
    );

    Ok(Json(StartResponse {
        outcome: outcome_name(report.outcome).to_string(),
        status: report.run.into(),
    }))
}

/// Pause the migration. Items already in flight finish.
#[utoipa::path(
    post,
    path = "/api/v0/migration/pause",
    tag = "migration",
    responses(
        (status = 200, description = "Run paused (or was not running)", body = StatusResponse)
    )
)]
#[tracing::instrument(skip(state))]
pub async fn pause_migration(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StatusResponse>, HttpAppError> {
    let run = state.control.pause().await?;
    tracing::info!(state = %run.state, "Migration pause requested");
    Ok(Json(run.into()))
}

/// Return every errored item to the queue. Does not start the run.
#[utoipa::path(
    post,
    path = "/api/v0/migration/retry-errors",
    tag = "migration",
    responses(
        (status = 200, description = "Errored items requeued", body = RetryErrorsResponse)
    )
)]
#[tracing::instrument(skip(state))]
pub async fn retry_errors(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RetryErrorsResponse>, HttpAppError> {
    let report = state.control.retry_errors().await?;
    Ok(Json(RetryErrorsResponse {
        requeued: report.requeued,
        status: report.run.into(),
    }))
}

/// Current migration progress
#[utoipa::path(
    get,
    path = "/api/v0/migration/status",
    tag = "migration",
    responses(
        (status = 200, description = "Current run snapshot", body = StatusResponse)
    )
)]
pub async fn migration_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(state.control.status().into())
}
