use crate::keys::{generate_key, validate_key};
use crate::traits::{Storage, StorageError, StorageResult, StoredObject};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use http::Method;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path;
use object_store::signer::Signer;
use object_store::Error as ObjectStoreError;
use object_store::{
    Attribute, AttributeValue, Attributes, ObjectStore, ObjectStoreExt, PutMode, PutOptions,
    PutPayload,
};
use std::time::Duration;

/// S3 storage implementation
#[derive(Clone)]
pub struct S3Storage {
    store: AmazonS3,
    bucket: String,
    url_ttl: Duration,
}

impl S3Storage {
    /// Create a new S3Storage instance
    ///
    /// # Arguments
    /// * `bucket` - S3 bucket name
    /// * `region` - AWS region (or region identifier for S3-compatible providers)
    /// * `endpoint_url` - Optional custom endpoint URL for S3-compatible providers
    ///   (e.g., "http://localhost:9000" for MinIO)
    /// * `url_ttl` - Lifetime of the presigned GET URLs handed out
    pub fn new(
        bucket: String,
        region: String,
        endpoint_url: Option<String>,
        url_ttl: Duration,
    ) -> StorageResult<Self> {
        // Credentials come from the standard AWS_* environment variables.
        let mut builder = AmazonS3Builder::from_env()
            .with_region(region)
            .with_bucket_name(bucket.clone());

        if let Some(endpoint) = endpoint_url {
            let allow_http = endpoint.starts_with("http://");
            builder = builder.with_endpoint(endpoint).with_allow_http(allow_http);
        }

        let store = builder
            .build()
            .map_err(|e| StorageError::ConfigError(e.to_string()))?;

        Ok(S3Storage {
            store,
            bucket,
            url_ttl,
        })
    }

    async fn presign(&self, key: &str) -> StorageResult<String> {
        let location = Path::from(key.to_string());
        let url = self
            .store
            .signed_url(Method::GET, &location, self.url_ttl)
            .await
            .map_err(|e| map_store_error(e, key))?;
        Ok(url.to_string())
    }
}

fn map_store_error(err: ObjectStoreError, key: &str) -> StorageError {
    match err {
        ObjectStoreError::NotFound { .. } => StorageError::NotFound(key.to_string()),
        ObjectStoreError::InvalidPath { source } => StorageError::InvalidPath(source.to_string()),
        ObjectStoreError::AlreadyExists { .. } => {
            StorageError::InvalidPath(format!("Key already exists: {}", key))
        }
        ObjectStoreError::PermissionDenied { .. }
        | ObjectStoreError::Unauthenticated { .. }
        | ObjectStoreError::NotSupported { .. }
        | ObjectStoreError::NotImplemented { .. } => StorageError::ConfigError(err.to_string()),
        other => StorageError::Unavailable(other.to_string()),
    }
}

#[async_trait]
impl Storage for S3Storage {
    async fn upload(
        &self,
        namespace: &str,
        content_type: &str,
        extension: &str,
        data: Bytes,
    ) -> StorageResult<StoredObject> {
        let key = generate_key(namespace, extension)?;
        let size = data.len() as u64;
        let location = Path::from(key.clone());

        let mut attributes = Attributes::new();
        attributes.insert(
            Attribute::ContentType,
            AttributeValue::from(content_type.to_string()),
        );
        // Create mode: the put fails rather than replacing an existing object.
        let options = PutOptions {
            mode: PutMode::Create,
            attributes,
            ..Default::default()
        };

        let start = std::time::Instant::now();

        self.store
            .put_opts(&location, PutPayload::from(data), options)
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %key,
                    size_bytes = size,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 upload failed"
                );
                map_store_error(e, &key)
            })?;

        let url = self.presign(&key).await?;

        tracing::info!(
            bucket = %self.bucket,
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 upload successful"
        );

        Ok(StoredObject { path: key, url })
    }

    async fn reissue_url(&self, path: &str) -> StorageResult<String> {
        validate_key(path)?;
        if !self.exists(path).await? {
            return Err(StorageError::NotFound(path.to_string()));
        }
        self.presign(path).await
    }

    async fn download(&self, path: &str) -> StorageResult<Bytes> {
        validate_key(path)?;
        let location = Path::from(path.to_string());
        let result = self
            .store
            .get(&location)
            .await
            .map_err(|e| map_store_error(e, path))?;
        result.bytes().await.map_err(|e| map_store_error(e, path))
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        validate_key(path)?;
        let location = Path::from(path.to_string());
        match self.store.head(&location).await {
            Ok(_) => Ok(true),
            Err(ObjectStoreError::NotFound { .. }) => Ok(false),
            Err(e) => Err(map_store_error(e, path)),
        }
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        validate_key(path)?;
        let start = std::time::Instant::now();
        let location = Path::from(path.to_string());
        match self.store.delete(&location).await {
            Ok(()) | Err(ObjectStoreError::NotFound { .. }) => {
                tracing::debug!(
                    bucket = %self.bucket,
                    key = %path,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 delete successful"
                );
                Ok(())
            }
            Err(e) => Err(map_store_error(e, path)),
        }
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::S3
    }
}
