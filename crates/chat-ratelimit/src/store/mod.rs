//! Pluggable accounting backends
//!
//! A store owns all mutable rate-limit state: bucket counters, the
//! bucket-hash aliases, the global lockout and the handshake markers. Every
//! operation that reads and mutates a counter must be atomic with respect to
//! every other caller of the same store, including callers in other
//! processes when the store is shared.

mod memory;
mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use crate::bucket::{Admission, BucketUpdate};
use crate::error::StoreResult;
use async_trait::async_trait;
use std::time::Duration;

/// Rate-limit accounting backend
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Atomically take one request from `key`'s bucket.
    ///
    /// Unknown buckets admit; exhausted buckets report the time to reset.
    async fn get_and_decrement(&self, key: &str) -> StoreResult<Admission>;

    /// Record the state the server reported for `key`.
    async fn set_bucket_state(&self, key: &str, update: BucketUpdate) -> StoreResult<()>;

    /// Remaining account-wide lockout, if one is active.
    async fn get_global_retry_after(&self) -> StoreResult<Option<Duration>>;

    /// Lock every caller out for `retry_after`.
    async fn set_global_retry_after(&self, retry_after: Duration) -> StoreResult<()>;

    /// Server bucket hash previously seen for a local route key.
    async fn bucket_hash(&self, route_key: &str) -> StoreResult<Option<String>>;

    /// Remember that `route_key` is accounted under `hash`.
    async fn set_bucket_hash(&self, route_key: &str, hash: &str) -> StoreResult<()>;

    /// Single atomic "set if absent" on the handshake marker for
    /// `shard_bucket`. `None` means the slot was taken by this caller;
    /// `Some(ttl)` is how long the current holder keeps it.
    async fn try_acquire_handshake_slot(
        &self,
        shard_bucket: u32,
        cooldown: Duration,
    ) -> StoreResult<Option<Duration>>;

    /// Block until this caller owns the handshake slot for `shard_bucket`.
    ///
    /// Every wake-up retries the atomic acquire: a marker that expired while
    /// we slept may already have been taken by someone else.
    async fn acquire_handshake_slot(&self, shard_bucket: u32, cooldown: Duration) -> StoreResult<()> {
        loop {
            match self.try_acquire_handshake_slot(shard_bucket, cooldown).await? {
                None => return Ok(()),
                Some(wait) => {
                    tracing::debug!(
                        shard_bucket,
                        wait_ms = wait.as_millis() as u64,
                        "Handshake slot held, waiting"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}
