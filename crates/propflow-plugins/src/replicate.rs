//! Replicate client for photo enhancement
//!
//! Runs an image-restoration model on Replicate (GFPGAN by default) and
//! downloads the result. Model: https://replicate.com/tencentarc/gfpgan

use crate::service::{EnhancedImage, Enhancer};
use crate::ServiceError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::time::Duration;
use tokio::time::sleep;

const SERVICE: &str = "replicate";
const REPLICATE_API_BASE: &str = "https://api.replicate.com/v1";
const MAX_POLL_ATTEMPTS: u32 = 300; // 5 minutes with 1-second intervals
const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Deserialize)]
struct PredictionResponse {
    id: String,
    status: String,
    output: Option<serde_json::Value>,
    error: Option<String>,
}

pub struct ReplicateEnhancer {
    http_client: reqwest::Client,
    api_token: String,
    model_version: String,
    base_url: String,
    poll_interval: Duration,
    max_poll_attempts: u32,
}

impl Debug for ReplicateEnhancer {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("ReplicateEnhancer")
            .field("model_version", &self.model_version)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl ReplicateEnhancer {
    pub fn new(api_token: impl Into<String>, model_version: impl Into<String>) -> Result<Self> {
        let api_token = api_token.into();
        validate_token(&api_token)?;

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300)) // 5 minutes timeout
            .build()
            .context("Failed to create HTTP client for Replicate")?;

        Ok(Self {
            http_client,
            api_token,
            model_version: model_version.into(),
            base_url: REPLICATE_API_BASE.to_string(),
            poll_interval: POLL_INTERVAL,
            max_poll_attempts: MAX_POLL_ATTEMPTS,
        })
    }

    /// Point the client at another API root (a proxy or a test server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_polling(mut self, interval: Duration, max_attempts: u32) -> Self {
        self.poll_interval = interval;
        self.max_poll_attempts = max_attempts.max(1);
        self
    }

    /// `owner/model` runs the latest version through the model endpoint; a
    /// bare version hash goes through `/predictions`.
    fn prediction_request(&self, image: &str) -> (String, serde_json::Value) {
        let input = json!({ "img": image, "image": image });
        match self.model_version.split_once(':') {
            None if self.model_version.contains('/') => (
                format!("{}/models/{}/predictions", self.base_url, self.model_version),
                json!({ "input": input }),
            ),
            Some((_, version)) => (
                format!("{}/predictions", self.base_url),
                json!({ "version": version, "input": input }),
            ),
            None => (
                format!("{}/predictions", self.base_url),
                json!({ "version": self.model_version, "input": input }),
            ),
        }
    }

    /// Create a prediction on Replicate
    async fn create_prediction(&self, image: Bytes, content_type: &str) -> Result<String, ServiceError> {
        let data_uri = format!(
            "data:{};base64,{}",
            content_type,
            base64::engine::general_purpose::STANDARD.encode(&image)
        );
        let (url, body) = self.prediction_request(&data_uri);

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", format!("Token {}", self.api_token))
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::from_reqwest(SERVICE, e))?;

        if !response.status().is_success() {
            return Err(ServiceError::from_response(SERVICE, response).await);
        }

        let prediction: PredictionResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::from_reqwest(SERVICE, e))?;

        Ok(prediction.id)
    }

    /// Get prediction status
    async fn get_prediction(&self, prediction_id: &str) -> Result<PredictionResponse, ServiceError> {
        let url = format!("{}/predictions/{}", self.base_url, prediction_id);

        let response = self
            .http_client
            .get(&url)
            .header("Authorization", format!("Token {}", self.api_token))
            .send()
            .await
            .map_err(|e| ServiceError::from_reqwest(SERVICE, e))?;

        if !response.status().is_success() {
            return Err(ServiceError::from_response(SERVICE, response).await);
        }

        response
            .json()
            .await
            .map_err(|e| ServiceError::from_reqwest(SERVICE, e))
    }

    /// Wait for prediction to complete
    async fn wait_for_prediction(&self, prediction_id: &str) -> Result<PredictionResponse, ServiceError> {
        for attempt in 0..self.max_poll_attempts {
            let prediction = self.get_prediction(prediction_id).await?;

            match prediction.status.as_str() {
                "succeeded" => {
                    tracing::info!(
                        prediction_id = %prediction_id,
                        attempts = attempt + 1,
                        "Replicate prediction completed successfully"
                    );
                    return Ok(prediction);
                }
                "failed" => {
                    let error_msg = prediction
                        .error
                        .unwrap_or_else(|| "Unknown error".to_string());
                    return Err(ServiceError::from_message(
                        SERVICE,
                        format!("Prediction failed: {}", error_msg),
                    ));
                }
                "canceled" => {
                    return Err(ServiceError::unavailable(SERVICE, "Prediction was canceled"));
                }
                "starting" | "processing" => {
                    tracing::debug!(
                        prediction_id = %prediction_id,
                        attempt = attempt + 1,
                        status = %prediction.status,
                        "Waiting for Replicate prediction to complete"
                    );
                    sleep(self.poll_interval).await;
                }
                _ => {
                    tracing::warn!(
                        prediction_id = %prediction_id,
                        status = %prediction.status,
                        "Unknown prediction status"
                    );
                    sleep(self.poll_interval).await;
                }
            }
        }

        Err(ServiceError::unavailable(
            SERVICE,
            format!(
                "Prediction timed out after {} attempts",
                self.max_poll_attempts
            ),
        ))
    }

    async fn download_output(&self, output_url: &str) -> Result<EnhancedImage, ServiceError> {
        tracing::debug!(output_url = %output_url, "Downloading enhanced image from Replicate");

        let response = self
            .http_client
            .get(output_url)
            .send()
            .await
            .map_err(|e| ServiceError::from_reqwest(SERVICE, e))?;

        if !response.status().is_success() {
            return Err(ServiceError::from_response(SERVICE, response).await);
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
            .unwrap_or_else(|| content_type_from_url(output_url).to_string());

        let data = response
            .bytes()
            .await
            .map_err(|e| ServiceError::from_reqwest(SERVICE, e))?;

        if data.is_empty() {
            return Err(ServiceError::invalid_request(SERVICE, "Enhanced image is empty"));
        }

        Ok(EnhancedImage { data, content_type })
    }
}

/// The output is a URL, or a list of URLs of which the first is the image.
fn output_url(output: Option<&serde_json::Value>) -> Option<&str> {
    match output? {
        serde_json::Value::String(url) => Some(url.as_str()),
        serde_json::Value::Array(items) => items.first().and_then(|v| v.as_str()),
        _ => None,
    }
}

fn content_type_from_url(url: &str) -> &'static str {
    let path = url.split('?').next().unwrap_or(url);
    match path.rsplit('.').next().map(|e| e.to_ascii_lowercase()).as_deref() {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    }
}

fn validate_token(api_token: &str) -> Result<()> {
    if api_token.is_empty() {
        anyhow::bail!("Replicate API token is required but not provided");
    }
    if api_token == "your-api-token" || api_token == "r8_" || api_token.len() < 10 {
        anyhow::bail!("Replicate API token appears to be invalid or a placeholder");
    }
    Ok(())
}

#[async_trait]
impl Enhancer for ReplicateEnhancer {
    fn name(&self) -> &'static str {
        SERVICE
    }

    async fn enhance(&self, image: Bytes, content_type: &str) -> Result<EnhancedImage, ServiceError> {
        let prediction_id = self.create_prediction(image, content_type).await?;
        tracing::debug!(prediction_id = %prediction_id, "Replicate prediction created");

        let prediction = self.wait_for_prediction(&prediction_id).await?;
        let url = output_url(prediction.output.as_ref()).ok_or_else(|| {
            ServiceError::invalid_request(SERVICE, "Prediction succeeded without an output URL")
        })?;

        self.download_output(url).await
    }
}
