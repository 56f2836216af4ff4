//! Queue intake and per-item lookups.

use crate::error::{HttpAppError, ValidatedJson};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use propflow_core::{AppError, MediaItem};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

/// Upper bound on references accepted in one enqueue request.
const MAX_ENQUEUE_BATCH: usize = 1_000;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueRequest {
    /// Source references: http(s) URLs, `gdrive:<id>` or local paths
    pub source_refs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ItemResponse {
    pub id: Uuid,
    pub source_ref: String,
    pub media_type: String,
    pub status: String,
    pub processed_path: Option<String>,
    pub processed_url: Option<String>,
    pub ai_primary_label: Option<String>,
    pub ai_labels: Vec<String>,
    pub ai_confidence: Option<f32>,
    pub ai_description: Option<String>,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<MediaItem> for ItemResponse {
    fn from(item: MediaItem) -> Self {
        Self {
            id: item.id,
            source_ref: item.source_ref,
            media_type: item.media_type.to_string(),
            status: item.status.to_string(),
            processed_path: item.processed_path,
            processed_url: item.processed_url,
            ai_primary_label: item.ai_primary_label.map(|l| l.as_str().to_string()),
            ai_labels: item
                .ai_labels
                .into_iter()
                .map(|l| l.as_str().to_string())
                .collect(),
            ai_confidence: item.ai_confidence,
            ai_description: item.ai_description,
            attempts: item.attempts,
            last_error: item.last_error,
            processed_at: item.processed_at,
            created_at: item.created_at,
            updated_at: item.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EnqueueResponse {
    pub items: Vec<ItemResponse>,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ItemUrlResponse {
    pub id: Uuid,
    /// Freshly issued, time-limited access URL
    pub url: String,
}

/// Queue photos for migration
#[utoipa::path(
    post,
    path = "/api/v0/migration/items",
    tag = "items",
    request_body = EnqueueRequest,
    responses(
        (status = 201, description = "Items queued as pending", body = EnqueueResponse),
        (status = 400, description = "Empty or oversized request", body = crate::error::ErrorResponse)
    )
)]
#[tracing::instrument(skip_all)]
pub async fn enqueue_items(
    State(state): State<Arc<AppState>>,
    ValidatedJson(request): ValidatedJson<EnqueueRequest>,
) -> Result<(StatusCode, Json<EnqueueResponse>), HttpAppError> {
    if request.source_refs.is_empty() {
        return Err(AppError::InvalidInput("sourceRefs must not be empty".to_string()).into());
    }
    if request.source_refs.len() > MAX_ENQUEUE_BATCH {
        return Err(AppError::InvalidInput(format!(
            "At most {} sourceRefs per request",
            MAX_ENQUEUE_BATCH
        ))
        .into());
    }

    let items = state.control.enqueue(request.source_refs).await?;
    tracing::info!(count = items.len(), "Items queued");

    let items: Vec<ItemResponse> = items.into_iter().map(ItemResponse::from).collect();
    Ok((
        StatusCode::CREATED,
        Json(EnqueueResponse {
            count: items.len(),
            items,
        }),
    ))
}

/// Get one item
#[utoipa::path(
    get,
    path = "/api/v0/migration/items/{id}",
    tag = "items",
    params(("id" = Uuid, Path, description = "Item ID")),
    responses(
        (status = 200, description = "Item found", body = ItemResponse),
        (status = 404, description = "No such item", body = crate::error::ErrorResponse)
    )
)]
#[tracing::instrument(skip(state))]
pub async fn get_item(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ItemResponse>, HttpAppError> {
    let item = state.control.item(id).await?;
    Ok(Json(item.into()))
}

/// Issue a fresh access URL for a processed item
#[utoipa::path(
    get,
    path = "/api/v0/migration/items/{id}/url",
    tag = "items",
    params(("id" = Uuid, Path, description = "Item ID")),
    responses(
        (status = 200, description = "New URL for the stored object", body = ItemUrlResponse),
        (status = 404, description = "No such item or object", body = crate::error::ErrorResponse),
        (status = 409, description = "Item not processed yet", body = crate::error::ErrorResponse)
    )
)]
#[tracing::instrument(skip(state))]
pub async fn reissue_item_url(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ItemUrlResponse>, HttpAppError> {
    let url = state.control.reissue_url(id).await?;
    Ok(Json(ItemUrlResponse { id, url }))
}
