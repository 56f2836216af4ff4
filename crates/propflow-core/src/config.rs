//! Configuration module
//!
//! `PipelineConfig` carries every knob of the migration service: HTTP server,
//! persistence, object storage, transcoder limits, scheduler sizing and the
//! external AI services. Values come from the process environment (and an
//! optional `.env` file) with documented defaults.

use std::env;
use std::str::FromStr;

use crate::storage_types::StorageBackend;

const SERVER_PORT: u16 = 3000;
const DB_MAX_CONNECTIONS: u32 = 10;
const SIGNED_URL_TTL_SECS: u64 = 3600;
const MAX_FILE_SIZE_MB: usize = 10;
const MAX_DIMENSION_PX: u32 = 2000;
const OUTPUT_QUALITY: u8 = 85;
const MIGRATION_BATCH_SIZE: usize = 20;
const MIGRATION_POOL_SIZE: usize = 2;
const AI_MAX_CONCURRENCY: usize = 2;
const AI_RETRY_BASE_MS: u64 = 2000;
const AI_RETRY_MULTIPLIER: u32 = 2;
const AI_RETRY_MAX_MS: u64 = 30_000;
const AI_RETRY_MAX_ATTEMPTS: u32 = 3;
const SOURCE_FETCH_TIMEOUT_SECS: u64 = 60;
const MIN_SIGNING_SECRET_LEN: usize = 32;

const DEFAULT_ALLOWED_CONTENT_TYPES: &str =
    "image/jpeg,image/png,image/webp,image/gif,image/bmp,image/tiff";
const DEFAULT_REPLICATE_MODEL: &str = "tencentarc/gfpgan";
const DEFAULT_VISION_MODEL: &str = "claude-sonnet-4-20250514";

#[derive(Clone)]
pub struct PipelineConfig {
    pub server_port: u16,
    pub environment: String,
    /// Origins allowed to call the control API from a browser. `*` allows any.
    pub cors_origins: Vec<String>,
    /// `LOG_FORMAT=json` switches console logs to JSON lines.
    pub log_json: bool,
    /// Absent means the in-memory item and run stores are used.
    pub database_url: Option<String>,
    pub db_max_connections: u32,

    // Object storage
    pub storage_backend: StorageBackend,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    /// Custom endpoint for S3-compatible providers (MinIO, R2, ...)
    pub s3_endpoint: Option<String>,
    pub local_storage_path: Option<String>,
    pub local_storage_base_url: Option<String>,
    pub url_signing_secret: Option<String>,
    pub signed_url_ttl_secs: u64,
    pub storage_namespace: String,

    // Transcoder
    pub max_file_size_bytes: usize,
    pub allowed_content_types: Vec<String>,
    pub max_dimension_px: u32,
    pub output_quality: u8,

    // Scheduler
    pub migration_batch_size: usize,
    pub migration_pool_size: usize,
    pub source_fetch_timeout_secs: u64,

    // External AI services
    pub enhancement_enabled: bool,
    pub classification_enabled: bool,
    pub ai_max_concurrency: usize,
    pub ai_retry_base_ms: u64,
    pub ai_retry_multiplier: u32,
    pub ai_retry_max_ms: u64,
    pub ai_retry_max_attempts: u32,
    pub replicate_api_token: Option<String>,
    pub replicate_model_version: String,
    pub anthropic_api_key: Option<String>,
    pub anthropic_vision_model: String,
}

impl std::fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("server_port", &self.server_port)
            .field("environment", &self.environment)
            .field("database", &self.database_url.as_ref().map(|_| "[REDACTED]"))
            .field("storage_backend", &self.storage_backend)
            .field("storage_namespace", &self.storage_namespace)
            .field("migration_batch_size", &self.migration_batch_size)
            .field("migration_pool_size", &self.migration_pool_size)
            .field("enhancement_enabled", &self.enhancement_enabled)
            .field("classification_enabled", &self.classification_enabled)
            .field("ai_max_concurrency", &self.ai_max_concurrency)
            .finish_non_exhaustive()
    }
}

/// In-process defaults: memory storage, in-memory stores, AI stages off.
impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            server_port: SERVER_PORT,
            environment: "development".to_string(),
            cors_origins: vec!["*".to_string()],
            log_json: false,
            database_url: None,
            db_max_connections: DB_MAX_CONNECTIONS,
            storage_backend: StorageBackend::Memory,
            s3_bucket: None,
            s3_region: None,
            s3_endpoint: None,
            local_storage_path: None,
            local_storage_base_url: None,
            url_signing_secret: None,
            signed_url_ttl_secs: SIGNED_URL_TTL_SECS,
            storage_namespace: "properties".to_string(),
            max_file_size_bytes: MAX_FILE_SIZE_MB * 1024 * 1024,
            allowed_content_types: split_list(DEFAULT_ALLOWED_CONTENT_TYPES),
            max_dimension_px: MAX_DIMENSION_PX,
            output_quality: OUTPUT_QUALITY,
            migration_batch_size: MIGRATION_BATCH_SIZE,
            migration_pool_size: MIGRATION_POOL_SIZE,
            source_fetch_timeout_secs: SOURCE_FETCH_TIMEOUT_SECS,
            enhancement_enabled: false,
            classification_enabled: false,
            ai_max_concurrency: AI_MAX_CONCURRENCY,
            ai_retry_base_ms: AI_RETRY_BASE_MS,
            ai_retry_multiplier: AI_RETRY_MULTIPLIER,
            ai_retry_max_ms: AI_RETRY_MAX_MS,
            ai_retry_max_attempts: AI_RETRY_MAX_ATTEMPTS,
            replicate_api_token: None,
            replicate_model_version: DEFAULT_REPLICATE_MODEL.to_string(),
            anthropic_api_key: None,
            anthropic_vision_model: DEFAULT_VISION_MODEL.to_string(),
        }
    }
}

impl PipelineConfig {
    /// Load from `.env` and the process environment, then validate.
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        let config = Self::from_lookup(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Build a config from an arbitrary variable source. Missing variables
    /// take their defaults; present but unparsable ones are an error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let storage_backend = match var("STORAGE_BACKEND") {
            Some(s) => s.parse::<StorageBackend>()?,
            None => StorageBackend::Local,
        };

        let max_file_size_mb: usize = parse_or(&var, "MAX_FILE_SIZE_MB", MAX_FILE_SIZE_MB)?;

        let allowed_content_types = split_list(
            &var("ALLOWED_CONTENT_TYPES")
                .unwrap_or_else(|| DEFAULT_ALLOWED_CONTENT_TYPES.to_string()),
        )
        .into_iter()
        .map(|t| {
            if t.contains('/') {
                t
            } else {
                format!("image/{}", t)
            }
        })
        .collect();

        Ok(Self {
            server_port: parse_or(&var, "SERVER_PORT", SERVER_PORT)?,
            environment: var("ENVIRONMENT")
                .or_else(|| var("APP_ENV"))
                .unwrap_or_else(|| "development".to_string()),
            cors_origins: split_list(&var("CORS_ORIGINS").unwrap_or_else(|| "*".to_string())),
            log_json: var("LOG_FORMAT").is_some_and(|f| f.trim().eq_ignore_ascii_case("json")),
            database_url: var("DATABASE_URL"),
            db_max_connections: parse_or(&var, "DB_MAX_CONNECTIONS", DB_MAX_CONNECTIONS)?,
            storage_backend,
            s3_bucket: var("S3_BUCKET"),
            s3_region: var("S3_REGION").or_else(|| var("AWS_REGION")),
            s3_endpoint: var("S3_ENDPOINT"),
            local_storage_path: var("LOCAL_STORAGE_PATH"),
            local_storage_base_url: var("LOCAL_STORAGE_BASE_URL"),
            url_signing_secret: var("URL_SIGNING_SECRET"),
            signed_url_ttl_secs: parse_or(&var, "SIGNED_URL_TTL_SECS", SIGNED_URL_TTL_SECS)?,
            storage_namespace: var("STORAGE_NAMESPACE").unwrap_or_else(|| "properties".to_string()),
            max_file_size_bytes: max_file_size_mb * 1024 * 1024,
            allowed_content_types,
            max_dimension_px: parse_or(&var, "MAX_DIMENSION_PX", MAX_DIMENSION_PX)?,
            output_quality: parse_or(&var, "OUTPUT_QUALITY", OUTPUT_QUALITY)?,
            migration_batch_size: parse_or(&var, "MIGRATION_BATCH_SIZE", MIGRATION_BATCH_SIZE)?,
            migration_pool_size: parse_or(&var, "MIGRATION_POOL_SIZE", MIGRATION_POOL_SIZE)?,
            source_fetch_timeout_secs: parse_or(
                &var,
                "SOURCE_FETCH_TIMEOUT_SECS",
                SOURCE_FETCH_TIMEOUT_SECS,
            )?,
            enhancement_enabled: parse_or(&var, "ENHANCEMENT_ENABLED", false)?,
            classification_enabled: parse_or(&var, "CLASSIFICATION_ENABLED", false)?,
            ai_max_concurrency: parse_or(&var, "AI_MAX_CONCURRENCY", AI_MAX_CONCURRENCY)?,
            ai_retry_base_ms: parse_or(&var, "AI_RETRY_BASE_MS", AI_RETRY_BASE_MS)?,
            ai_retry_multiplier: parse_or(&var, "AI_RETRY_MULTIPLIER", AI_RETRY_MULTIPLIER)?,
            ai_retry_max_ms: parse_or(&var, "AI_RETRY_MAX_MS", AI_RETRY_MAX_MS)?,
            ai_retry_max_attempts: parse_or(
                &var,
                "AI_RETRY_MAX_ATTEMPTS",
                AI_RETRY_MAX_ATTEMPTS,
            )?,
            replicate_api_token: var("REPLICATE_API_TOKEN"),
            replicate_model_version: var("REPLICATE_MODEL_VERSION")
                .unwrap_or_else(|| DEFAULT_REPLICATE_MODEL.to_string()),
            anthropic_api_key: var("ANTHROPIC_API_KEY"),
            anthropic_vision_model: var("ANTHROPIC_VISION_MODEL")
                .unwrap_or_else(|| DEFAULT_VISION_MODEL.to_string()),
        })
    }

    pub fn is_production(&self) -> bool {
        let env = self.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.migration_pool_size == 0 {
            return Err(anyhow::anyhow!("MIGRATION_POOL_SIZE must be at least 1"));
        }
        if self.migration_batch_size == 0 {
            return Err(anyhow::anyhow!("MIGRATION_BATCH_SIZE must be at least 1"));
        }
        if self.ai_max_concurrency == 0 {
            return Err(anyhow::anyhow!("AI_MAX_CONCURRENCY must be at least 1"));
        }
        if self.ai_retry_max_attempts == 0 {
            return Err(anyhow::anyhow!("AI_RETRY_MAX_ATTEMPTS must be at least 1"));
        }
        if self.ai_retry_multiplier == 0 {
            return Err(anyhow::anyhow!("AI_RETRY_MULTIPLIER must be at least 1"));
        }
        if self.max_dimension_px == 0 {
            return Err(anyhow::anyhow!("MAX_DIMENSION_PX must be at least 1"));
        }
        if self.output_quality == 0 || self.output_quality > 100 {
            return Err(anyhow::anyhow!("OUTPUT_QUALITY must be between 1 and 100"));
        }
        if self.storage_namespace.is_empty()
            || !self
                .storage_namespace
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(anyhow::anyhow!(
                "STORAGE_NAMESPACE may only contain letters, digits, '-' and '_'"
            ));
        }

        if let Some(url) = &self.database_url {
            if !url.starts_with("postgres://") && !url.starts_with("postgresql://") {
                return Err(anyhow::anyhow!(
                    "DATABASE_URL must be a valid PostgreSQL connection string"
                ));
            }
        }

        match self.storage_backend {
            StorageBackend::S3 => {
                if self.s3_bucket.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_BUCKET must be set when using S3 storage backend"
                    ));
                }
                if self.s3_region.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_REGION or AWS_REGION must be set when using S3 storage backend"
                    ));
                }
            }
            StorageBackend::Local => {
                if self.local_storage_path.is_none() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_PATH must be set when using local storage backend"
                    ));
                }
                if self.local_storage_base_url.is_none() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_BASE_URL must be set when using local storage backend"
                    ));
                }
                match &self.url_signing_secret {
                    Some(secret) if secret.len() >= MIN_SIGNING_SECRET_LEN => {}
                    _ => {
                        return Err(anyhow::anyhow!(
                            "URL_SIGNING_SECRET must be at least {} characters long when using local storage backend",
                            MIN_SIGNING_SECRET_LEN
                        ));
                    }
                }
            }
            StorageBackend::Memory => {}
        }

        if self.enhancement_enabled && self.replicate_api_token.is_none() {
            return Err(anyhow::anyhow!(
                "ENHANCEMENT_ENABLED=true requires REPLICATE_API_TOKEN to be set"
            ));
        }
        if self.classification_enabled && self.anthropic_api_key.is_none() {
            return Err(anyhow::anyhow!(
                "CLASSIFICATION_ENABLED=true requires ANTHROPIC_API_KEY to be set"
            ));
        }

        Ok(())
    }
}

fn parse_or<T, F>(var: &F, key: &str, default: T) -> Result<T, anyhow::Error>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .to_lowercase()
            .parse::<T>()
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: {}", key, raw)),
        None => Ok(default),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<PipelineConfig, anyhow::Error> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        PipelineConfig::from_lookup(|key| vars.get(key).cloned())
    }

    fn local_vars() -> Vec<(&'static str, &'static str)> {
        vec![
            ("LOCAL_STORAGE_PATH", "/tmp/propflow"),
            ("LOCAL_STORAGE_BASE_URL", "http://localhost:3000/media"),
            ("URL_SIGNING_SECRET", "0123456789abcdef0123456789abcdef"),
        ]
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config_from(&local_vars()).unwrap();
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.storage_backend, StorageBackend::Local);
        assert_eq!(config.max_file_size_bytes, 10 * 1024 * 1024);
        assert_eq!(config.max_dimension_px, 2000);
        assert_eq!(config.output_quality, 85);
        assert_eq!(config.migration_pool_size, 2);
        assert_eq!(config.ai_retry_base_ms, 2000);
        assert_eq!(config.ai_retry_max_ms, 30_000);
        assert_eq!(config.ai_retry_max_attempts, 3);
        assert!(config.database_url.is_none());
        assert!(config.allowed_content_types.contains(&"image/webp".to_string()));
        config.validate().unwrap();
    }

    #[test]
    fn short_content_types_get_image_prefix() {
        let mut vars = local_vars();
        vars.push(("ALLOWED_CONTENT_TYPES", "jpeg, PNG"));
        let config = config_from(&vars).unwrap();
        assert_eq!(
            config.allowed_content_types,
            vec!["image/jpeg".to_string(), "image/png".to_string()]
        );
    }

    #[test]
    fn invalid_number_is_an_error() {
        let mut vars = local_vars();
        vars.push(("MIGRATION_POOL_SIZE", "lots"));
        let err = config_from(&vars).unwrap_err();
        assert!(err.to_string().contains("MIGRATION_POOL_SIZE"));
    }

    #[test]
    fn enabling_enhancement_requires_token() {
        let mut vars = local_vars();
        vars.push(("ENHANCEMENT_ENABLED", "true"));
        let config = config_from(&vars).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn s3_requires_bucket_and_region() {
        let config = config_from(&[("STORAGE_BACKEND", "s3"), ("S3_BUCKET", "media")]).unwrap();
        assert!(config.validate().is_err());

        let config = config_from(&[
            ("STORAGE_BACKEND", "s3"),
            ("S3_BUCKET", "media"),
            ("AWS_REGION", "eu-west-1"),
        ])
        .unwrap();
        assert_eq!(config.s3_region.as_deref(), Some("eu-west-1"));
        config.validate().unwrap();
    }

    #[test]
    fn zero_pool_size_rejected() {
        let config = PipelineConfig {
            migration_pool_size: 0,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn local_backend_requires_long_secret() {
        let config = config_from(&[
            ("LOCAL_STORAGE_PATH", "/tmp/propflow"),
            ("LOCAL_STORAGE_BASE_URL", "http://localhost:3000/media"),
            ("URL_SIGNING_SECRET", "short"),
        ])
        .unwrap();
        assert!(config.validate().is_err());
    }
}
