//! Bucket accounting records and the values exchanged with a store.

use std::time::Duration;

/// How long to wait when a bucket is exhausted but its next reset is not
/// yet known (the response that will tell us is still in flight).
pub const PENDING_RESET_WAIT: Duration = Duration::from_millis(250);

/// Result of one atomic read-and-decrement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// The caller may send now
    pub admit: bool,
    /// Time until the bucket resets, meaningful only when `admit` is false
    pub retry_after: Duration,
}

impl Admission {
    #[must_use]
    pub const fn granted() -> Self {
        Self {
            admit: true,
            retry_after: Duration::ZERO,
        }
    }

    #[must_use]
    pub const fn wait(retry_after: Duration) -> Self {
        Self {
            admit: false,
            retry_after,
        }
    }
}

/// Bucket state reported by the server on one response
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketUpdate {
    pub limit: u32,
    pub remaining: u32,
    pub reset_after: Duration,
}

/// Rate-limit information carried by a response's headers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitHeaders {
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    pub reset_after: Option<Duration>,
    /// Opaque server-assigned bucket hash
    pub bucket: Option<String>,
    /// The account-wide limit was hit
    pub global: bool,
    pub retry_after: Option<Duration>,
}

impl RateLimitHeaders {
    /// The per-bucket update, if the response carried a complete one
    #[must_use]
    pub fn bucket_update(&self) -> Option<BucketUpdate> {
        Some(BucketUpdate {
            limit: self.limit?,
            remaining: self.remaining?,
            reset_after: self.reset_after?,
        })
    }

    /// Duration of the account-wide lockout, if one was reported
    #[must_use]
    pub fn global_lockout(&self) -> Option<Duration> {
        if self.global {
            Some(self.retry_after.unwrap_or(Duration::from_secs(1)))
        } else {
            None
        }
    }
}
