//! Single-process accounting store.
//!
//! Buckets live in one `DashMap`; the map's per-shard locks make each
//! read-and-decrement atomic without a lazily-built map of mutexes.

use super::RateLimitStore;
use crate::bucket::{Admission, BucketUpdate, PENDING_RESET_WAIT};
use crate::error::StoreResult;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct BucketState {
    limit: u32,
    remaining: u32,
    /// `None` after a local refill, until the next response reports the new
    /// window. Tokens spent in that gap count against the new window.
    reset_at: Option<Instant>,
}

impl BucketState {
    fn take(&mut self, now: Instant) -> Admission {
        if self.reset_at.is_some_and(|reset_at| now >= reset_at) {
            self.remaining = self.limit;
            self.reset_at = None;
        }

        if self.remaining > 0 {
            self.remaining -= 1;
            return Admission::granted();
        }

        match self.reset_at {
            Some(reset_at) => Admission::wait(reset_at - now),
            None => Admission::wait(PENDING_RESET_WAIT),
        }
    }

    fn apply(&mut self, update: BucketUpdate, now: Instant) {
        let window_open = self.reset_at.map_or(true, |reset_at| reset_at > now);
        // Responses race each other; never hand back tokens already spent locally.
        self.remaining = if window_open {
            update.remaining.min(self.remaining)
        } else {
            update.remaining
        };
        self.limit = update.limit;
        self.reset_at = Some(now + update.reset_after);
    }
}

/// In-memory store for a single process
#[derive(Debug, Default)]
pub struct MemoryStore {
    buckets: DashMap<String, BucketState>,
    hashes: DashMap<String, String>,
    handshakes: DashMap<u32, Instant>,
    global_until: Mutex<Option<Instant>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buckets with known state
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

#[async_trait]
impl RateLimitStore for MemoryStore {
    async fn get_and_decrement(&self, key: &str) -> StoreResult<Admission> {
        let now = Instant::now();
        Ok(match self.buckets.get_mut(key) {
            Some(mut bucket) => bucket.take(now),
            None => Admission::granted(),
        })
    }

    async fn set_bucket_state(&self, key: &str, update: BucketUpdate) -> StoreResult<()> {
        let now = Instant::now();
        match self.buckets.entry(key.to_string()) {
            Entry::Occupied(mut entry) => entry.get_mut().apply(update, now),
            Entry::Vacant(entry) => {
                entry.insert(BucketState {
                    limit: update.limit,
                    remaining: update.remaining,
                    reset_at: Some(now + update.reset_after),
                });
            }
        }
        Ok(())
    }

    async fn get_global_retry_after(&self) -> StoreResult<Option<Duration>> {
        let now = Instant::now();
        let mut until = self.global_until.lock();
        match *until {
            Some(deadline) if deadline > now => Ok(Some(deadline - now)),
            Some(_) => {
                *until = None;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_global_retry_after(&self, retry_after: Duration) -> StoreResult<()> {
        let deadline = Instant::now() + retry_after;
        let mut until = self.global_until.lock();
        if until.map_or(true, |current| current < deadline) {
            *until = Some(deadline);
        }
        Ok(())
    }

    async fn bucket_hash(&self, route_key: &str) -> StoreResult<Option<String>> {
        Ok(self.hashes.get(route_key).map(|hash| hash.clone()))
    }

    async fn set_bucket_hash(&self, route_key: &str, hash: &str) -> StoreResult<()> {
        self.hashes.insert(route_key.to_string(), hash.to_string());
        Ok(())
    }

    async fn try_acquire_handshake_slot(
        &self,
        shard_bucket: u32,
        cooldown: Duration,
    ) -> StoreResult<Option<Duration>> {
        let now = Instant::now();
        match self.handshakes.entry(shard_bucket) {
            Entry::Occupied(mut entry) => {
                let held_until = *entry.get();
                if held_until > now {
                    Ok(Some(held_until - now))
                } else {
                    entry.insert(now + cooldown);
                    Ok(None)
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now + cooldown);
                Ok(None)
            }
        }
    }
}
