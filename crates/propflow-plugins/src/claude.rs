//! Claude vision client for room-type classification using Anthropic's Claude API

use crate::service::Classifier;
use crate::ServiceError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use propflow_core::{RawClassification, RoomLabel};
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::time::Duration;

const SERVICE: &str = "claude_vision";
const API_BASE: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 512;

/// Claude vision classifier
pub struct ClaudeClassifier {
    http_client: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    base_url: String,
}

impl Debug for ClaudeClassifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("ClaudeClassifier")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

// Messages API request/response structures
#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<MessageParam>,
}

#[derive(Debug, Serialize)]
struct MessageParam {
    role: String,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    Image { source: ImageSource },
}

#[derive(Debug, Serialize)]
struct ImageSource {
    #[serde(rename = "type")]
    source_type: String,
    media_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlockResponse>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlockResponse {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

impl ClaudeClassifier {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        validate_api_key(&api_key)?;

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("Failed to create HTTP client for Claude Vision")?;

        Ok(Self {
            http_client,
            api_key,
            model: model.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            base_url: API_BASE.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Build the classification prompt from the closed vocabulary
    fn build_prompt() -> String {
        let vocabulary = RoomLabel::ALL
            .iter()
            .map(|l| l.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        [
            "Classify this real-estate photo by the room or area it shows.".to_string(),
            format!("Use only these labels: {}.", vocabulary),
            "Respond with a JSON object with the following fields:".to_string(),
            "- primary_label: the single best label".to_string(),
            "- labels: every label that applies, most relevant first".to_string(),
            "- confidence: a number between 0 and 1 for primary_label".to_string(),
            "- description: one short sentence describing the photo".to_string(),
            "\nProvide the response in valid JSON format only.".to_string(),
        ]
        .join("\n")
    }

    /// Call Claude Messages API with image
    async fn analyze_image(&self, image: &[u8], content_type: &str) -> Result<String, ServiceError> {
        let media_type = if is_supported_media_type(content_type) {
            content_type
        } else {
            detect_media_type(image)
        };

        let body = MessagesRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            messages: vec![MessageParam {
                role: "user".to_string(),
                content: vec![
                    ContentBlock::Image {
                        source: ImageSource {
                            source_type: "base64".to_string(),
                            media_type: media_type.to_string(),
                            data: base64::engine::general_purpose::STANDARD.encode(image),
                        },
                    },
                    ContentBlock::Text {
                        text: Self::build_prompt(),
                    },
                ],
            }],
        };

        let response = self
            .http_client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::from_reqwest(SERVICE, e))?;

        if !response.status().is_success() {
            return Err(ServiceError::from_response(SERVICE, response).await);
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::from_reqwest(SERVICE, e))?;

        if let Some(usage) = &parsed.usage {
            tracing::debug!(
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "Claude classification usage"
            );
        }

        parsed
            .content
            .into_iter()
            .find_map(|b| match b {
                ContentBlockResponse::Text { text } => Some(text),
                ContentBlockResponse::Other => None,
            })
            .ok_or_else(|| ServiceError::invalid_request(SERVICE, "Response contained no text"))
    }

    /// Parse Claude's JSON response into a raw classification
    fn parse_analysis_result(text: &str) -> Result<RawClassification> {
        // Try to extract JSON from markdown code blocks if present
        let json_text = if text.contains("```json") {
            text.split("```json")
                .nth(1)
                .and_then(|s| s.split("```").next())
                .unwrap_or(text)
                .trim()
        } else if text.contains("```") {
            text.split("```")
                .nth(1)
                .and_then(|s| s.split("```").next())
                .unwrap_or(text)
                .trim()
        } else {
            text.trim()
        };

        serde_json::from_str(json_text).context("Failed to parse Claude analysis result as JSON")
    }
}

fn validate_api_key(api_key: &str) -> Result<()> {
    if api_key.is_empty() {
        anyhow::bail!("Claude Vision API key is required but not provided");
    }
    if api_key == "your-api-key" || api_key == "sk-ant-" || api_key.len() < 10 {
        anyhow::bail!("Claude Vision API key appears to be invalid or a placeholder. Please provide a valid Anthropic API key.");
    }
    Ok(())
}

fn is_supported_media_type(content_type: &str) -> bool {
    matches!(
        content_type,
        "image/jpeg" | "image/png" | "image/gif" | "image/webp"
    )
}

/// Detect media type from image data using magic numbers
fn detect_media_type(data: &[u8]) -> &'static str {
    if data.len() < 4 {
        return "image/jpeg"; // Default
    }

    // JPEG: FF D8 FF
    if data[0] == 0xFF && data[1] == 0xD8 && data[2] == 0xFF {
        return "image/jpeg";
    }

    // PNG: 89 50 4E 47
    if data[0] == 0x89 && data[1] == 0x50 && data[2] == 0x4E && data[3] == 0x47 {
        return "image/png";
    }

    // GIF: 47 49 46
    if data[0] == 0x47 && data[1] == 0x49 && data[2] == 0x46 {
        return "image/gif";
    }

    // WebP: RIFF ... WEBP
    if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        return "image/webp";
    }

    "image/jpeg" // Default
}

#[async_trait]
impl Classifier for ClaudeClassifier {
    fn name(&self) -> &'static str {
        SERVICE
    }

    async fn classify(
        &self,
        image: Bytes,
        content_type: &str,
    ) -> Result<RawClassification, ServiceError> {
        let text = self.analyze_image(&image, content_type).await?;

        // Unparseable output will not get better on retry
        Self::parse_analysis_result(&text).map_err(|e| {
            ServiceError::invalid_request(SERVICE, format!("{:#}: {}", e, truncate(&text, 200)))
        })
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
