//! Error taxonomy for calls to external AI services.
//!
//! Responses are classified once, at the HTTP edge, so the retry loop and the
//! pipeline never have to inspect status codes or message text themselves.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// The service asked us to slow down (429, quota exhaustion).
    #[error("{service} rate limited: {message}")]
    RateLimited {
        service: &'static str,
        message: String,
        retry_after: Option<Duration>,
    },

    /// Network failure, timeout or 5xx. Worth a later operator retry.
    #[error("{service} unavailable: {message}")]
    Unavailable {
        service: &'static str,
        message: String,
    },

    /// Anything else the service rejected: auth, malformed payload, bad output.
    #[error("{service} rejected request: {message}")]
    InvalidRequest {
        service: &'static str,
        message: String,
    },
}

impl ServiceError {
    pub fn rate_limited(service: &'static str, message: impl Into<String>) -> Self {
        ServiceError::RateLimited {
            service,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn unavailable(service: &'static str, message: impl Into<String>) -> Self {
        ServiceError::Unavailable {
            service,
            message: message.into(),
        }
    }

    pub fn invalid_request(service: &'static str, message: impl Into<String>) -> Self {
        ServiceError::InvalidRequest {
            service,
            message: message.into(),
        }
    }

    /// Classify a non-success HTTP response.
    pub fn from_status(
        service: &'static str,
        status: u16,
        body: &str,
        retry_after: Option<Duration>,
    ) -> Self {
        let message = format!("{} - {}", status, body.trim());

        if status == 429 || mentions_rate_limit(body) {
            return ServiceError::RateLimited {
                service,
                message,
                retry_after,
            };
        }

        // 529 is Anthropic's "overloaded"
        if status == 408 || (500..=599).contains(&status) {
            return ServiceError::Unavailable { service, message };
        }

        ServiceError::InvalidRequest { service, message }
    }

    /// Classify a service-reported failure that arrived inside a 2xx body,
    /// such as a failed prediction.
    pub fn from_message(service: &'static str, message: impl Into<String>) -> Self {
        let message = message.into();
        if mentions_rate_limit(&message) {
            ServiceError::rate_limited(service, message)
        } else {
            ServiceError::invalid_request(service, message)
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ServiceError::RateLimited { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ServiceError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn service(&self) -> &'static str {
        match self {
            ServiceError::RateLimited { service, .. }
            | ServiceError::Unavailable { service, .. }
            | ServiceError::InvalidRequest { service, .. } => service,
        }
    }
}

#[cfg(any(feature = "plugin-claude-vision", feature = "plugin-replicate"))]
impl ServiceError {
    /// Classify a transport-level failure from reqwest.
    pub fn from_reqwest(service: &'static str, err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            return ServiceError::unavailable(service, err.to_string());
        }
        if let Some(status) = err.status() {
            return ServiceError::from_status(service, status.as_u16(), &err.to_string(), None);
        }
        if err.is_decode() {
            return ServiceError::invalid_request(
                service,
                format!("Malformed response: {}", err),
            );
        }
        ServiceError::unavailable(service, err.to_string())
    }

    /// Turn a non-success response into a classified error, reading the
    /// `Retry-After` header and the body.
    pub async fn from_response(service: &'static str, response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let retry_after = parse_retry_after(response.headers());
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        ServiceError::from_status(service, status, &body, retry_after)
    }
}

fn mentions_rate_limit(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    lower.contains("rate limit")
        || lower.contains("rate_limit")
        || lower.contains("too many requests")
        || lower.contains("quota")
}

/// Seconds form of `Retry-After`. The HTTP-date form is ignored.
#[cfg(any(feature = "plugin-claude-vision", feature = "plugin-replicate"))]
pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
