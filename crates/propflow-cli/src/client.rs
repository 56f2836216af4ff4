//! HTTP client for the migration control API.

use anyhow::{Context, Result};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// API version prefix. Set PROPFLOW_API_VERSION to match the server.
pub fn api_prefix() -> String {
    let version = std::env::var("PROPFLOW_API_VERSION").unwrap_or_else(|_| "v0".to_string());
    format!("/api/{}", version)
}

/// Run snapshot as served by `GET /migration/status`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunStatus {
    pub status: String,
    pub total_photos: i64,
    pub processed_photos: i64,
    pub pending_photos: i64,
    pub error_photos: i64,
    #[serde(default)]
    pub processing_photos: i64,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_updated_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl RunStatus {
    pub fn is_running(&self) -> bool {
        self.status == "running"
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: String,
    code: Option<String>,
    suggested_action: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    prefix: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            prefix: api_prefix(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, self.prefix, path)
    }

    pub async fn start(&self) -> Result<serde_json::Value> {
        self.post("/migration/start", None::<&()>).await
    }

    pub async fn pause(&self) -> Result<RunStatus> {
        self.post("/migration/pause", None::<&()>).await
    }

    pub async fn retry_errors(&self) -> Result<serde_json::Value> {
        self.post("/migration/retry-errors", None::<&()>).await
    }

    pub async fn status(&self) -> Result<RunStatus> {
        self.get("/migration/status").await
    }

    pub async fn enqueue(&self, source_refs: &[String]) -> Result<serde_json::Value> {
        let body = serde_json::json!({ "sourceRefs": source_refs });
        self.post("/migration/items", Some(&body)).await
    }

    pub async fn item(&self, id: &str) -> Result<serde_json::Value> {
        self.get(&format!("/migration/items/{}", id)).await
    }

    pub async fn item_url(&self, id: &str) -> Result<serde_json::Value> {
        self.get(&format!("/migration/items/{}/url", id)).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        tracing::debug!(url = %url, "GET");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.base_url))?;
        parse(response).await
    }

    async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: Option<&B>) -> Result<T> {
        let url = self.url(path);
        tracing::debug!(url = %url, "POST");
        let mut request = self.client.post(&url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.base_url))?;
        parse(response).await
    }
}

async fn parse<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        let message = match serde_json::from_str::<ApiErrorBody>(&text) {
            Ok(body) => {
                let mut message = body.error;
                if let Some(code) = body.code {
                    message = format!("{} [{}]", message, code);
                }
                if let Some(action) = body.suggested_action {
                    message = format!("{} ({})", message, action);
                }
                message
            }
            Err(_) => text,
        };
        return Err(anyhow::anyhow!(
            "API request failed with status {}: {}",
            status,
            message
        ));
    }

    response
        .json()
        .await
        .context("Failed to parse response as JSON")
}
