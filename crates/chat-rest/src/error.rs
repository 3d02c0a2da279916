//! REST dispatcher errors

use chat_ratelimit::RateLimitError;
use serde::Deserialize;
use thiserror::Error;

/// Errors returned by `RestClient::request`
#[derive(Debug, Error)]
pub enum RestError {
    // =========================================================================
    // Before the request is sent
    // =========================================================================
    /// The rate limiter could not admit the request; nothing was sent
    #[error("Rate limiter failure: {0}")]
    RateLimit(#[from] RateLimitError),

    #[error("Failed to encode request body: {0}")]
    Encode(String),

    // =========================================================================
    // On the wire
    // =========================================================================
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    // =========================================================================
    // After a response
    // =========================================================================
    #[error("Failed to decode response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl RestError {
    /// The API error, if the server answered with a non-2xx status
    pub fn as_api(&self) -> Option<&ApiError> {
        match self {
            Self::Api(err) => Some(err),
            _ => None,
        }
    }
}

/// Result type for REST operations
pub type RestResult<T> = Result<T, RestError>;

/// A non-2xx response
#[derive(Debug, Clone)]
pub struct ApiError {
    pub status: u16,
    /// Raw response body, always kept
    pub body: String,
    /// Numeric error code from a `{code, message}` body
    pub code: Option<i64>,
    pub message: Option<String>,
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let detail = self.message.as_deref().unwrap_or(&self.body);
        write!(f, "API returned {}: {detail}", self.status)
    }
}

impl std::error::Error for ApiError {}

#[derive(Deserialize)]
struct ErrorBody {
    code: Option<i64>,
    message: Option<String>,
}

impl ApiError {
    /// Build from a status and raw body, picking up `{code, message}` when
    /// the body is shaped that way.
    #[must_use]
    pub fn new(status: u16, body: String) -> Self {
        let (code, message) = match serde_json::from_str::<ErrorBody>(&body) {
            Ok(parsed) => (parsed.code, parsed.message),
            Err(_) => (None, None),
        };
        Self {
            status,
            body,
            code,
            message,
        }
    }

    #[must_use]
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    #[must_use]
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }

    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        self.status == 429
    }
}
