//! Shard error types

use chat_ratelimit::RateLimitError;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors raised by a shard
#[derive(Debug, Error)]
pub enum ShardError {
    #[error("Failed to connect to gateway: {0}")]
    Connect(#[source] tungstenite::Error),

    #[error("WebSocket error: {0}")]
    Socket(#[from] tungstenite::Error),

    /// The server did not open the session as expected
    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Malformed frame: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Unexpected frame: {0}")]
    UnexpectedFrame(String),

    #[error("Rate limiter failure: {0}")]
    RateLimit(#[from] RateLimitError),

    #[error("Shard is not connected")]
    NotConnected,
}

/// Result type for shard operations
pub type ShardResult<T> = Result<T, ShardError>;
