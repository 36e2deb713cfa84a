//! Typed failures raised by the Finnhub client.
//!
//! [`ApiError`] carries everything a caller needs to self-correct: the HTTP
//! status, the requested URL, the query parameters and whatever message the
//! server supplied. [`ClientError`] wraps it together with the two failure
//! modes that never produce a usable HTTP status.

use std::fmt;

use serde_json::Value;
use thiserror::Error;

const BODY_PREVIEW_CHARS: usize = 200;

/// Statuses the client retries. Everything else fails on the first response.
pub const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    Validation,
    Authentication,
    Permission,
    NotFound,
    RateLimit,
    Server,
    Unexpected,
}

impl ApiErrorKind {
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => ApiErrorKind::Validation,
            401 => ApiErrorKind::Authentication,
            403 => ApiErrorKind::Permission,
            404 => ApiErrorKind::NotFound,
            429 => ApiErrorKind::RateLimit,
            500..=599 => ApiErrorKind::Server,
            _ => ApiErrorKind::Unexpected,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ApiErrorKind::Validation => "ValidationError",
            ApiErrorKind::Authentication => "AuthenticationError",
            ApiErrorKind::Permission => "PermissionError",
            ApiErrorKind::NotFound => "NotFoundError",
            ApiErrorKind::RateLimit => "RateLimitError",
            ApiErrorKind::Server => "ServerError",
            ApiErrorKind::Unexpected => "FinnhubAPIError",
        }
    }

    fn default_message(self, status: u16) -> String {
        match self {
            ApiErrorKind::Validation => "Invalid request parameters".to_string(),
            ApiErrorKind::Authentication => "Invalid or missing API key".to_string(),
            ApiErrorKind::Permission => "Insufficient permissions for this endpoint".to_string(),
            ApiErrorKind::NotFound => "Requested resource not found".to_string(),
            ApiErrorKind::RateLimit => "API rate limit exceeded".to_string(),
            ApiErrorKind::Server => format!("Finnhub API server error ({})", status),
            ApiErrorKind::Unexpected => format!("Unexpected API error ({})", status),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub status: u16,
    pub message: String,
    pub url: String,
    pub params: Vec<(String, String)>,
    /// Parsed response body, when the server sent JSON.
    pub body: Option<Value>,
}

impl ApiError {
    /// Build an error from a non-success response.
    ///
    /// The message comes from the body's `error` field, then `message`, then
    /// the first characters of a non-JSON body, then a per-kind default.
    pub fn from_response(
        status: u16,
        url: impl Into<String>,
        params: Vec<(String, String)>,
        body_text: &str,
    ) -> Self {
        let kind = ApiErrorKind::from_status(status);
        let body = serde_json::from_str::<Value>(body_text).ok();

        let server_message = match &body {
            Some(value) => ["error", "message"]
                .iter()
                .filter_map(|key| value.get(*key))
                .find_map(|v| match v {
                    Value::String(s) if !s.is_empty() => Some(s.clone()),
                    Value::Null => None,
                    Value::String(_) => None,
                    other => Some(other.to_string()),
                })
                .unwrap_or_default(),
            None => body_text.chars().take(BODY_PREVIEW_CHARS).collect(),
        };

        let message = if server_message.trim().is_empty() {
            kind.default_message(status)
        } else {
            server_message
        };

        Self {
            kind,
            status,
            message,
            url: url.into(),
            params,
            body,
        }
    }

    pub fn is_retryable(&self) -> bool {
        RETRYABLE_STATUSES.contains(&self.status)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if self.status != 0 {
            write!(f, " | Status: {}", self.status)?;
        }
        if !self.url.is_empty() {
            write!(f, " | URL: {}", self.url)?;
        }
        if !self.params.is_empty() {
            let joined = self
                .params
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(", ");
            write!(f, " | Params: {}", joined)?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Finnhub API returned malformed JSON for {endpoint}")]
    MalformedResponse { endpoint: String, preview: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl ClientError {
    /// Short type name used when a failure is recorded on a job.
    pub fn kind_name(&self) -> &'static str {
        match self {
            ClientError::Api(err) => err.kind.name(),
            ClientError::MalformedResponse { .. } => "MalformedResponseError",
            ClientError::Network(err) if err.is_timeout() => "TimeoutError",
            ClientError::Network(_) => "NetworkError",
        }
    }

    pub fn as_api(&self) -> Option<&ApiError> {
        match self {
            ClientError::Api(err) => Some(err),
            _ => None,
        }
    }
}
