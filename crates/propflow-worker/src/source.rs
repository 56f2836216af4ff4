//! Fetching original assets from their `source_ref`.
//!
//! Supported references:
//! - `http://` / `https://` URLs
//! - `gdrive:<fileId>`, fetched through the drive download endpoint
//! - `file://<path>` or a bare local path

use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

const DRIVE_DOWNLOAD_BASE: &str = "https://drive.google.com/uc?export=download&id=";

#[derive(Debug, Error)]
pub enum FetchError {
    /// The asset does not exist or the reference is malformed.
    #[error("Source not found: {0}")]
    NotFound(String),

    #[error("Invalid source reference: {0}")]
    InvalidReference(String),

    /// Network failure, timeout or 5xx from the origin.
    #[error("Source unavailable: {0}")]
    Unavailable(String),

    #[error("Source rejected request: {status} - {message}")]
    Rejected { status: u16, message: String },
}

impl FetchError {
    /// Whether a later retry could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Unavailable(_))
    }
}

/// Original bytes plus whatever the origin claimed they are.
#[derive(Debug, Clone)]
pub struct FetchedMedia {
    pub data: Bytes,
    pub content_type: Option<String>,
}

#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn fetch(&self, source_ref: &str) -> Result<FetchedMedia, FetchError>;
}

/// Resolves every supported reference kind over HTTP or the local disk.
#[derive(Debug, Clone)]
pub struct SourceFetcher {
    http_client: reqwest::Client,
    drive_base: String,
}

impl SourceFetcher {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client for source fetching: {}", e))?;

        Ok(Self {
            http_client,
            drive_base: DRIVE_DOWNLOAD_BASE.to_string(),
        })
    }

    /// Override the drive download prefix; the file id is appended to it.
    pub fn with_drive_base(mut self, base: impl Into<String>) -> Self {
        self.drive_base = base.into();
        self
    }

    async fn fetch_http(&self, url: &str) -> Result<FetchedMedia, FetchError> {
        let response = self.http_client.get(url).send().await.map_err(|e| {
            if e.is_builder() {
                FetchError::InvalidReference(format!("{}: {}", url, e))
            } else {
                FetchError::Unavailable(format!("{}: {}", url, e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(match status.as_u16() {
                404 | 410 => FetchError::NotFound(url.to_string()),
                408 | 429 => FetchError::Unavailable(format!("{} - {}", status, message)),
                s if s >= 500 => FetchError::Unavailable(format!("{} - {}", status, message)),
                s => FetchError::Rejected { status: s, message },
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
            // Generic binary types say nothing; fall back to the extension.
            .filter(|v| !v.starts_with("application/octet-stream"))
            .or_else(|| content_type_from_extension(url).map(str::to_string));

        let data = response
            .bytes()
            .await
            .map_err(|e| FetchError::Unavailable(format!("{}: {}", url, e)))?;

        Ok(FetchedMedia { data, content_type })
    }

    async fn fetch_file(&self, path: &Path) -> Result<FetchedMedia, FetchError> {
        match tokio::fs::read(path).await {
            Ok(data) => Ok(FetchedMedia {
                data: Bytes::from(data),
                content_type: path
                    .to_str()
                    .and_then(content_type_from_extension)
                    .map(str::to_string),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FetchError::NotFound(path.display().to_string()))
            }
            Err(e) => Err(FetchError::Unavailable(format!("{}: {}", path.display(), e))),
        }
    }
}

#[async_trait]
impl MediaSource for SourceFetcher {
    async fn fetch(&self, source_ref: &str) -> Result<FetchedMedia, FetchError> {
        let source_ref = source_ref.trim();
        if source_ref.is_empty() {
            return Err(FetchError::InvalidReference("empty reference".to_string()));
        }

        if source_ref.starts_with("http://") || source_ref.starts_with("https://") {
            return self.fetch_http(source_ref).await;
        }

        if let Some(file_id) = source_ref.strip_prefix("gdrive:") {
            let valid = !file_id.is_empty()
                && file_id
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
            if !valid {
                return Err(FetchError::InvalidReference(source_ref.to_string()));
            }
            let url = format!("{}{}", self.drive_base, file_id);
            return self.fetch_http(&url).await;
        }

        let path = source_ref.strip_prefix("file://").unwrap_or(source_ref);
        self.fetch_file(Path::new(path)).await
    }
}

fn content_type_from_extension(reference: &str) -> Option<&'static str> {
    let path = reference.split(['?', '#']).next().unwrap_or(reference);
    let ext = path.rsplit_once('.')?.1.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "bmp" => Some("image/bmp"),
        "tif" | "tiff" => Some("image/tiff"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher() -> SourceFetcher {
        SourceFetcher::new(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn extension_lookup() {
        assert_eq!(content_type_from_extension("https://x/a/b.JPG?x=1"), Some("image/jpeg"));
        assert_eq!(content_type_from_extension("/tmp/scan.tiff"), Some("image/tiff"));
        assert_eq!(content_type_from_extension("https://x/download"), None);
    }

    #[tokio::test]
    async fn reads_local_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("front.png");
        std::fs::write(&path, b"png bytes").unwrap();

        let fetched = fetcher()
            .fetch(&format!("file://{}", path.display()))
            .await
            .unwrap();
        assert_eq!(fetched.data, Bytes::from_static(b"png bytes"));
        assert_eq!(fetched.content_type.as_deref(), Some("image/png"));

        let err = fetcher()
            .fetch(&dir.path().join("missing.jpg").display().to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::NotFound(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn http_status_mapping() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/ok.jpg")
            .with_status(200)
            .with_header("content-type", "application/octet-stream")
            .with_body(b"jpeg")
            .create_async()
            .await;
        server
            .mock("GET", "/gone.jpg")
            .with_status(404)
            .create_async()
            .await;
        server
            .mock("GET", "/flaky.jpg")
            .with_status(503)
            .create_async()
            .await;

        let fetched = fetcher()
            .fetch(&format!("{}/ok.jpg", server.url()))
            .await
            .unwrap();
        assert_eq!(fetched.content_type.as_deref(), Some("image/jpeg"));

        let err = fetcher()
            .fetch(&format!("{}/gone.jpg", server.url()))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::NotFound(_)));

        let err = fetcher()
            .fetch(&format!("{}/flaky.jpg", server.url()))
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn drive_references_use_download_endpoint() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/uc")
            .match_query(mockito::Matcher::UrlEncoded("id".into(), "abc_123".into()))
            .with_status(200)
            .with_header("content-type", "image/jpeg")
            .with_body(b"drive bytes")
            .create_async()
            .await;

        let fetched = fetcher()
            .with_drive_base(format!("{}/uc?export=download&id=", server.url()))
            .fetch("gdrive:abc_123")
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(fetched.data, Bytes::from_static(b"drive bytes"));

        let err = fetcher().fetch("gdrive:../etc").await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidReference(_)));
    }
}
