//! Serves objects from the local filesystem backend behind signed URLs.

use crate::error::HttpAppError;
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
};
use propflow_core::AppError;
use propflow_storage::StorageError;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct SignedQuery {
    pub expires: u64,
    pub sig: String,
}

fn content_type_for(key: &str) -> &'static str {
    match key.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()) {
        Some(ext) if ext == "jpg" || ext == "jpeg" => "image/jpeg",
        Some(ext) if ext == "png" => "image/png",
        Some(ext) if ext == "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

#[tracing::instrument(skip(state, query))]
pub async fn serve_media(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Query(query): Query<SignedQuery>,
) -> Result<Response, HttpAppError> {
    let media = state
        .media
        .as_ref()
        .ok_or_else(|| AppError::NotFound("Media serving is not enabled".to_string()))?;

    // Expired and forged links look the same to the caller.
    if !media.signer.verify(&key, query.expires, &query.sig) {
        tracing::debug!(key = %key, "Rejected media request with invalid signature");
        return Err(AppError::NotFound("Object not found".to_string()).into());
    }

    let data = media.storage.download(&key).await.map_err(|e| match e {
        StorageError::NotFound(_) | StorageError::InvalidPath(_) => {
            AppError::NotFound("Object not found".to_string())
        }
        other => AppError::Storage(other.to_string()),
    })?;

    Ok((
        [
            (header::CONTENT_TYPE, content_type_for(&key)),
            (header::CACHE_CONTROL, "private, max-age=300"),
        ],
        data,
    )
        .into_response())
}
