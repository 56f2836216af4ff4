//! Route configuration and setup

use crate::api_doc::ApiDoc;
use crate::constants::{API_PREFIX, DEFAULT_HTTP_CONCURRENCY_LIMIT};
use crate::handlers;
use crate::state::AppState;
use axum::{
    http::{HeaderValue, Method},
    response::Json,
    routing::{get, post},
    Router,
};
use propflow_core::PipelineConfig;
use std::sync::Arc;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

/// Enqueue bodies are lists of references, never media.
const MAX_REQUEST_BODY_BYTES: usize = 1024 * 1024;

/// Setup all application routes
pub fn setup_routes(
    config: &PipelineConfig,
    state: Arc<AppState>,
) -> Result<Router<()>, anyhow::Error> {
    let cors = setup_cors(config)?;

    let http_concurrency_limit = std::env::var("HTTP_CONCURRENCY_LIMIT")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(DEFAULT_HTTP_CONCURRENCY_LIMIT)
        .max(1);

    let app = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route(
            "/api/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        .route("/media/{*key}", get(handlers::media::serve_media))
        .nest(API_PREFIX, api_routes())
        .layer(ConcurrencyLimitLayer::new(http_concurrency_limit))
        .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BODY_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    Ok(app)
}

fn api_routes() -> Router<Arc<AppState>> {
    use handlers::{items, migration};

    Router::new()
        .route("/migration/start", post(migration::start_migration))
        .route("/migration/pause", post(migration::pause_migration))
        .route("/migration/retry-errors", post(migration::retry_errors))
        .route("/migration/status", get(migration::migration_status))
        .route("/migration/items", post(items::enqueue_items))
        .route("/migration/items/{id}", get(items::get_item))
        .route("/migration/items/{id}/url", get(items::reissue_item_url))
}

/// Setup CORS configuration
fn setup_cors(config: &PipelineConfig) -> Result<CorsLayer, anyhow::Error> {
    let methods = [Method::GET, Method::POST, Method::OPTIONS];

    if config.cors_origins.iter().any(|o| o == "*") {
        tracing::warn!("CORS configured to allow all origins - not recommended for production");
        return Ok(CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(Any));
    }

    let origins = config
        .cors_origins
        .iter()
        .map(|o| {
            o.parse::<HeaderValue>()
                .map_err(|e| anyhow::anyhow!("Invalid CORS origin {:?}: {}", o, e))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(methods)
        .allow_headers(Any))
}
