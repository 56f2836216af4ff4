use crate::keys::{generate_key, validate_key};
use crate::traits::{Storage, StorageError, StorageResult, StoredObject};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// Process-local object store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStorage {
    objects: RwLock<HashMap<String, (String, Bytes)>>,
    issued: AtomicU64,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    pub async fn content_type(&self, path: &str) -> Option<String> {
        self.objects.read().await.get(path).map(|(ct, _)| ct.clone())
    }

    fn url_for(&self, key: &str) -> String {
        // A counter stands in for the expiry so each issued URL is distinct.
        let n = self.issued.fetch_add(1, Ordering::Relaxed);
        format!("memory://{}?token={}", key, n)
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn upload(
        &self,
        namespace: &str,
        content_type: &str,
        extension: &str,
        data: Bytes,
    ) -> StorageResult<StoredObject> {
        let key = generate_key(namespace, extension)?;
        let mut objects = self.objects.write().await;
        if objects.contains_key(&key) {
            return Err(StorageError::InvalidPath(format!(
                "Key already exists: {}",
                key
            )));
        }
        objects.insert(key.clone(), (content_type.to_string(), data));
        drop(objects);

        let url = self.url_for(&key);
        Ok(StoredObject { path: key, url })
    }

    async fn reissue_url(&self, path: &str) -> StorageResult<String> {
        validate_key(path)?;
        if !self.objects.read().await.contains_key(path) {
            return Err(StorageError::NotFound(path.to_string()));
        }
        Ok(self.url_for(path))
    }

    async fn download(&self, path: &str) -> StorageResult<Bytes> {
        validate_key(path)?;
        self.objects
            .read()
            .await
            .get(path)
            .map(|(_, data)| data.clone())
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        validate_key(path)?;
        Ok(self.objects.read().await.contains_key(path))
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        validate_key(path)?;
        self.objects.write().await.remove(path);
        Ok(())
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reissue_returns_fresh_url_for_same_bytes() {
        let storage = MemoryStorage::new();
        let stored = storage
            .upload("properties", "image/jpeg", "jpg", Bytes::from_static(b"abc"))
            .await
            .unwrap();

        let reissued = storage.reissue_url(&stored.path).await.unwrap();
        assert_ne!(reissued, stored.url);
        assert!(reissued.contains(&stored.path));
        assert_eq!(storage.len().await, 1);
        assert_eq!(
            storage.content_type(&stored.path).await.as_deref(),
            Some("image/jpeg")
        );
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let storage = MemoryStorage::new();
        let stored = storage
            .upload("properties", "image/jpeg", "jpg", Bytes::from_static(b"abc"))
            .await
            .unwrap();

        storage.delete(&stored.path).await.unwrap();
        assert!(storage.is_empty().await);
        storage.delete(&stored.path).await.unwrap();
        assert!(matches!(
            storage.reissue_url(&stored.path).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn missing_object() {
        let storage = MemoryStorage::new();
        assert!(!storage.exists("media/properties/x.jpg").await.unwrap());
        assert!(matches!(
            storage.download("media/properties/x.jpg").await,
            Err(StorageError::NotFound(_))
        ));
    }
}
