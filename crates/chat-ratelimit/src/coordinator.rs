//! Rate-limit coordinator
//!
//! Admits requests through the store's atomic per-bucket accounting, honours
//! the account-wide lockout, resolves server bucket hashes, and spaces out
//! session handshakes per shard bucket.

use crate::bucket::RateLimitHeaders;
use crate::error::{RateLimitError, RateLimitResult, StoreError};
use crate::pool::RedisPool;
use crate::route::RateLimitRoute;
use crate::store::{MemoryStore, RateLimitStore, RedisStore};
use chat_common::{RateLimitBackend, RateLimitSettings, RedisConfig};
use std::sync::Arc;
use std::time::Duration;

/// Coordinator settings
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Minimum spacing between handshakes within one shard bucket
    pub identify_cooldown: Duration,
    /// Number of shard buckets handshakes are spread over
    pub identify_concurrency: u32,
    /// Upper bound on waits before `execute_call` gives up
    pub max_attempts: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            identify_cooldown: Duration::from_secs(6),
            identify_concurrency: 1,
            max_attempts: 64,
        }
    }
}

impl From<&RateLimitSettings> for CoordinatorConfig {
    fn from(settings: &RateLimitSettings) -> Self {
        Self {
            identify_cooldown: Duration::from_millis(settings.identify_cooldown_ms),
            identify_concurrency: settings.identify_concurrency.max(1),
            max_attempts: settings.max_attempts.max(1),
        }
    }
}

/// Shared admission control for REST calls and gateway handshakes
pub struct RateLimitCoordinator {
    store: Arc<dyn RateLimitStore>,
    config: CoordinatorConfig,
}

impl std::fmt::Debug for RateLimitCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitCoordinator")
            .field("config", &self.config)
            .finish()
    }
}

impl RateLimitCoordinator {
    pub fn new(store: Arc<dyn RateLimitStore>, config: CoordinatorConfig) -> Self {
        Self { store, config }
    }

    /// Coordinator backed by a fresh single-process store
    #[must_use]
    pub fn in_memory(config: CoordinatorConfig) -> Self {
        Self::new(Arc::new(MemoryStore::new()), config)
    }

    /// Build the coordinator for the configured backend.
    ///
    /// The Redis backend is health-checked so a bad URL fails at startup
    /// rather than on the first request.
    pub async fn from_settings(
        settings: &RateLimitSettings,
        redis: Option<&RedisConfig>,
    ) -> RateLimitResult<Self> {
        let config = CoordinatorConfig::from(settings);
        match settings.backend {
            RateLimitBackend::Memory => Ok(Self::in_memory(config)),
            RateLimitBackend::Redis => {
                let redis = redis.ok_or_else(|| {
                    StoreError::CreatePool("redis backend selected without REDIS_URL".to_string())
                })?;
                let pool = RedisPool::from_config(redis)?;
                pool.health_check().await?;
                Ok(Self::new(Arc::new(RedisStore::new(pool)), config))
            }
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// The accounting key for `route`: its server bucket hash once known,
    /// otherwise the local route key.
    pub async fn bucket_key(&self, route: &RateLimitRoute) -> RateLimitResult<String> {
        let route_key = route.key();
        Ok(match self.store.bucket_hash(&route_key).await? {
            Some(hash) => hash,
            None => route_key,
        })
    }

    /// Wait until a request on `route` may be sent.
    ///
    /// Returns the bucket key the request was accounted under. Store failures
    /// are returned as errors; the request must not be sent in that case.
    pub async fn execute_call(&self, route: &RateLimitRoute) -> RateLimitResult<String> {
        let key = self.bucket_key(route).await?;
        let mut last_wait = Duration::ZERO;

        for attempt in 0..self.config.max_attempts {
            if let Some(global) = self.store.get_global_retry_after().await? {
                tracing::debug!(
                    bucket = %key,
                    wait_ms = global.as_millis() as u64,
                    "Global rate limit active, waiting"
                );
                last_wait = global;
                tokio::time::sleep(global).await;
                continue;
            }

            let admission = self.store.get_and_decrement(&key).await?;
            if admission.admit {
                if attempt > 0 {
                    tracing::trace!(bucket = %key, attempt, "Request admitted after waiting");
                }
                return Ok(key);
            }

            tracing::debug!(
                bucket = %key,
                route = %route,
                wait_ms = admission.retry_after.as_millis() as u64,
                "Bucket exhausted, waiting for reset"
            );
            last_wait = admission.retry_after;
            tokio::time::sleep(admission.retry_after).await;
        }

        tracing::warn!(
            bucket = %key,
            attempts = self.config.max_attempts,
            "Giving up on rate-limited request"
        );
        Err(RateLimitError::AttemptsExhausted {
            key,
            attempts: self.config.max_attempts,
            last_wait,
        })
    }

    /// Feed a response's rate-limit headers back into the store.
    pub async fn update(
        &self,
        route: &RateLimitRoute,
        headers: &RateLimitHeaders,
    ) -> RateLimitResult<()> {
        let key = match headers.bucket.as_deref() {
            Some(hash) => {
                let route_key = route.key();
                if self.store.bucket_hash(&route_key).await?.as_deref() != Some(hash) {
                    tracing::debug!(route = %route_key, bucket = %hash, "Learned bucket hash");
                    self.store.set_bucket_hash(&route_key, hash).await?;
                }
                hash.to_string()
            }
            None => self.bucket_key(route).await?,
        };

        if let Some(update) = headers.bucket_update() {
            tracing::trace!(
                bucket = %key,
                limit = update.limit,
                remaining = update.remaining,
                reset_after_ms = update.reset_after.as_millis() as u64,
                "Bucket state updated"
            );
            self.store.set_bucket_state(&key, update).await?;
        }

        if let Some(lockout) = headers.global_lockout() {
            tracing::warn!(
                retry_after_ms = lockout.as_millis() as u64,
                "Global rate limit hit"
            );
            self.store.set_global_retry_after(lockout).await?;
        }

        Ok(())
    }

    /// Which handshake bucket a shard belongs to
    #[must_use]
    pub fn shard_bucket(&self, shard_index: u32) -> u32 {
        shard_index % self.config.identify_concurrency.max(1)
    }

    /// Block until shard `shard_index` may send an Identify.
    pub async fn identify_wait(&self, shard_index: u32) -> RateLimitResult<()> {
        let bucket = self.shard_bucket(shard_index);
        self.store
            .acquire_handshake_slot(bucket, self.config.identify_cooldown)
            .await?;
        tracing::debug!(shard = shard_index, shard_bucket = bucket, "Handshake slot acquired");
        Ok(())
    }
}
