//! Expiring signed URLs for backends without native presigning.
//!
//! Query: `?expires={unix_secs}&sig={token}` where
//! token = base64url(HMAC-SHA256(secret, "{key}\n{expires}")).

use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::traits::{StorageError, StorageResult};

#[derive(Clone)]
pub struct UrlSigner {
    mac: Hmac<Sha256>,
    ttl: Duration,
}

impl std::fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlSigner")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl UrlSigner {
    pub fn new(secret: &[u8], ttl: Duration) -> StorageResult<Self> {
        if secret.is_empty() {
            return Err(StorageError::ConfigError(
                "URL signing secret must not be empty".to_string(),
            ));
        }
        let mac = Hmac::<Sha256>::new_from_slice(secret)
            .map_err(|e| StorageError::ConfigError(format!("Invalid signing secret: {}", e)))?;
        Ok(Self { mac, ttl })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Append a fresh signature to `base`, valid for the configured TTL from now.
    pub fn sign_url(&self, base: &str, key: &str) -> String {
        let expires = now_unix() + self.ttl.as_secs();
        format!(
            "{}?expires={}&sig={}",
            base,
            expires,
            self.signature(key, expires)
        )
    }

    pub fn verify(&self, key: &str, expires: u64, sig: &str) -> bool {
        self.verify_at(key, expires, sig, now_unix())
    }

    pub fn verify_at(&self, key: &str, expires: u64, sig: &str, now: u64) -> bool {
        if now > expires {
            return false;
        }
        let Ok(tag) = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(sig) else {
            return false;
        };
        let mut mac = self.mac.clone();
        mac.update(payload(key, expires).as_bytes());
        mac.verify_slice(&tag).is_ok()
    }

    fn signature(&self, key: &str, expires: u64) -> String {
        let mut mac = self.mac.clone();
        mac.update(payload(key, expires).as_bytes());
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }
}

fn payload(key: &str, expires: u64) -> String {
    format!("{}\n{}", key, expires)
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
