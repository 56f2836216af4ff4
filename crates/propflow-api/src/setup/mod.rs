//! Application setup and initialization

pub mod routes;
pub mod server;
pub mod validation;

use crate::state::{AppState, MediaServing};
use anyhow::{Context, Result};
use propflow_core::{PipelineConfig, StorageBackend};
use propflow_storage::UrlSigner;
use propflow_worker::MigrationControl;
use std::sync::Arc;
use std::time::Duration;

/// Initialize the entire application: telemetry, stores, storage, the
/// migration controller and the router.
pub async fn initialize_app(config: PipelineConfig) -> Result<(Arc<AppState>, axum::Router)> {
    crate::telemetry::init_telemetry(config.log_json)
        .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    validation::validate_config(&config).context("Configuration validation failed")?;
    tracing::info!(config = ?config, "Configuration loaded and validated successfully");

    let control = MigrationControl::from_config(&config)
        .await
        .context("Failed to initialize migration controller")?;

    let state = build_state(&config, Arc::new(control))?;
    let router = routes::setup_routes(&config, state.clone())?;

    Ok((state, router))
}

/// Handler state around an existing controller.
pub fn build_state(config: &PipelineConfig, control: Arc<MigrationControl>) -> Result<Arc<AppState>> {
    let media = match (config.storage_backend, config.url_signing_secret.as_deref()) {
        (StorageBackend::Local, Some(secret)) => {
            let signer = UrlSigner::new(
                secret.as_bytes(),
                Duration::from_secs(config.signed_url_ttl_secs),
            )
            .context("Invalid URL signing secret")?;
            Some(MediaServing {
                storage: control.storage().clone(),
                signer,
            })
        }
        _ => None,
    };

    Ok(Arc::new(AppState { control, media }))
}
