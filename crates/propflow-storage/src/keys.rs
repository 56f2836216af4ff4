//! Shared key generation and validation for storage backends.
//!
//! Key format: `media/{namespace}/{uuid}.{extension}`.

use crate::traits::{StorageError, StorageResult};
use uuid::Uuid;

const KEY_PREFIX: &str = "media/";
const MAX_NAMESPACE_LEN: usize = 64;

/// Generate a fresh key. Every call returns a new key, so two uploads can
/// never collide.
pub fn generate_key(namespace: &str, extension: &str) -> StorageResult<String> {
    validate_namespace(namespace)?;

    if extension.is_empty()
        || extension.len() > 8
        || !extension.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return Err(StorageError::InvalidPath(format!(
            "invalid extension: {:?}",
            extension
        )));
    }

    Ok(format!(
        "{}{}/{}.{}",
        KEY_PREFIX,
        namespace,
        Uuid::new_v4(),
        extension.to_lowercase()
    ))
}

pub fn validate_namespace(namespace: &str) -> StorageResult<()> {
    if namespace.is_empty()
        || namespace.len() > MAX_NAMESPACE_LEN
        || !namespace
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(StorageError::InvalidPath(format!(
            "invalid namespace: {:?}",
            namespace
        )));
    }
    Ok(())
}

/// Check that a caller-supplied path looks like one this crate generated.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if !key.starts_with(KEY_PREFIX)
        || key.contains("..")
        || key.contains('\\')
        || key.contains("//")
        || key.ends_with('/')
    {
        return Err(StorageError::InvalidPath(format!(
            "invalid storage key: {:?}",
            key
        )));
    }
    Ok(())
}
