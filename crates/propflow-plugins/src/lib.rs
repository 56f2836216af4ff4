//! Propflow Plugins
//!
//! Clients and workers for the external AI services used by the pipeline:
//! photo enhancement and room-type classification. Service clients only make
//! calls and classify failures; [`EnhancementWorker`] and
//! [`ClassificationWorker`] add bounded concurrency and rate-limit backoff.

pub mod error;
pub mod limiter;
pub mod retry;
pub mod service;
pub mod worker;

#[cfg(feature = "plugin-claude-vision")]
pub mod claude;
#[cfg(feature = "plugin-replicate")]
pub mod replicate;

pub use error::ServiceError;
pub use limiter::ConcurrencyLimiter;
pub use retry::{call_with_retry, AttemptLog, RetryPolicy};
pub use service::{Classifier, EnhancedImage, Enhancer};
pub use worker::{ClassificationWorker, EnhancementWorker, ImageJob, JobOutcome};

#[cfg(feature = "plugin-claude-vision")]
pub use claude::ClaudeClassifier;
#[cfg(feature = "plugin-replicate")]
pub use replicate::ReplicateEnhancer;

use anyhow::Result;
use propflow_core::PipelineConfig;
use std::sync::Arc;

/// Build the enhancement worker if enhancement is enabled.
pub fn enhancement_worker_from_config(config: &PipelineConfig) -> Result<Option<EnhancementWorker>> {
    if !config.enhancement_enabled {
        return Ok(None);
    }

    #[cfg(feature = "plugin-replicate")]
    {
        let token = config
            .replicate_api_token
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("REPLICATE_API_TOKEN is required when enhancement is enabled"))?;
        let enhancer = ReplicateEnhancer::new(token, config.replicate_model_version.clone())?;

        tracing::info!(model = %config.replicate_model_version, "Enhancement enabled");
        Ok(Some(EnhancementWorker::new(
            Arc::new(enhancer),
            ConcurrencyLimiter::new("replicate", config.ai_max_concurrency),
            RetryPolicy::from_config(config),
        )))
    }

    #[cfg(not(feature = "plugin-replicate"))]
    anyhow::bail!("Enhancement is enabled but the plugin-replicate feature is not compiled in")
}

/// Build the classification worker if classification is enabled.
pub fn classification_worker_from_config(
    config: &PipelineConfig,
) -> Result<Option<ClassificationWorker>> {
    if !config.classification_enabled {
        return Ok(None);
    }

    #[cfg(feature = "plugin-claude-vision")]
    {
        let key = config
            .anthropic_api_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("ANTHROPIC_API_KEY is required when classification is enabled"))?;
        let classifier = ClaudeClassifier::new(key, config.anthropic_vision_model.clone())?;

        tracing::info!(model = %config.anthropic_vision_model, "Classification enabled");
        Ok(Some(ClassificationWorker::new(
            Arc::new(classifier),
            ConcurrencyLimiter::new("claude_vision", config.ai_max_concurrency),
            RetryPolicy::from_config(config),
        )))
    }

    #[cfg(not(feature = "plugin-claude-vision"))]
    anyhow::bail!("Classification is enabled but the plugin-claude-vision feature is not compiled in")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_services_build_nothing() {
        let config = PipelineConfig::default();
        assert!(enhancement_worker_from_config(&config).unwrap().is_none());
        assert!(classification_worker_from_config(&config).unwrap().is_none());
    }

    #[test]
    fn enabled_without_credentials_fails() {
        let config = PipelineConfig {
            classification_enabled: true,
            ..PipelineConfig::default()
        };
        assert!(classification_worker_from_config(&config).is_err());
    }
}
