//! Startup checks that only matter for the HTTP surface. Field-level checks
//! live in `PipelineConfig::validate`.

use anyhow::Result;
use propflow_core::PipelineConfig;

pub fn validate_config(config: &PipelineConfig) -> Result<()> {
    if config.is_production() && config.cors_origins.iter().any(|o| o == "*") {
        return Err(anyhow::anyhow!(
            "CORS configured to allow all origins (*) in production. \
            Set specific allowed origins via the CORS_ORIGINS environment variable."
        ));
    }

    if config.is_production() && config.database_url.is_none() {
        tracing::warn!("No DATABASE_URL in production; migration state is lost on restart");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_cors_rejected_in_production() {
        let config = PipelineConfig {
            environment: "production".to_string(),
            ..PipelineConfig::default()
        };
        assert!(validate_config(&config).is_err());

        let config = PipelineConfig {
            environment: "production".to_string(),
            cors_origins: vec!["https://ops.example.com".to_string()],
            ..PipelineConfig::default()
        };
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn wildcard_cors_allowed_in_development() {
        assert!(validate_config(&PipelineConfig::default()).is_ok());
    }
}
