//! Rate limiter error types

use std::time::Duration;

/// Errors raised by an accounting store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to create Redis pool: {0}")]
    CreatePool(String),

    #[error("Failed to get connection from pool: {0}")]
    GetConnection(#[from] deadpool_redis::PoolError),

    #[error("Redis command error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Unexpected store reply: {0}")]
    UnexpectedReply(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced to callers waiting for admission
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    /// The accounting backend failed; the call is not admitted
    #[error("Rate limit store failure: {0}")]
    Store(#[from] StoreError),

    /// The admission loop gave up after the configured number of waits
    #[error("Bucket {key} still exhausted after {attempts} waits (last wait {last_wait:?})")]
    AttemptsExhausted {
        key: String,
        attempts: u32,
        last_wait: Duration,
    },
}

/// Result type for coordinator operations
pub type RateLimitResult<T> = Result<T, RateLimitError>;
