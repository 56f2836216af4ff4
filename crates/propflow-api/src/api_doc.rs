//! OpenAPI documentation, served at `/api/openapi.json`.

use utoipa::OpenApi;

use crate::error;
use crate::handlers;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Propflow Migration API",
        version = "0.1.0",
        description = "Control API for the property photo migration: queue photos, start, pause and retry the run, and follow its progress. Control routes are versioned under /api/v0/."
    ),
    paths(
        handlers::health::health_check,
        handlers::migration::start_migration,
        handlers::migration::pause_migration,
        handlers::migration::retry_errors,
        handlers::migration::migration_status,
        handlers::items::enqueue_items,
        handlers::items::get_item,
        handlers::items::reissue_item_url,
    ),
    components(schemas(
        error::ErrorResponse,
        handlers::health::HealthResponse,
        handlers::migration::StatusResponse,
        handlers::migration::StartResponse,
        handlers::migration::RetryErrorsResponse,
        handlers::items::EnqueueRequest,
        handlers::items::EnqueueResponse,
        handlers::items::ItemResponse,
        handlers::items::ItemUrlResponse,
    )),
    tags(
        (name = "migration", description = "Run control and progress"),
        (name = "items", description = "Queue intake and item lookups"),
        (name = "health", description = "Probes")
    )
)]
pub struct ApiDoc;
