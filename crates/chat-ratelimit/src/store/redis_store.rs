//! Redis-backed accounting store.
//!
//! Lets several processes share one account's budget. Counter updates run
//! as Lua scripts so read-and-decrement is atomic across every client of
//! the same Redis instance. Timestamps are wall-clock milliseconds supplied
//! by the caller, so participating hosts need reasonably synced clocks.

use super::RateLimitStore;
use crate::bucket::{Admission, BucketUpdate, PENDING_RESET_WAIT};
use crate::error::{StoreError, StoreResult};
use crate::pool::RedisPool;
use async_trait::async_trait;
use redis::{AsyncCommands, Script};
use std::time::Duration;

/// Key prefix for bucket counters
const BUCKET_PREFIX: &str = "ratelimit:bucket:";
/// Key prefix for route → bucket hash aliases
const HASH_PREFIX: &str = "ratelimit:hash:";
/// Key prefix for handshake markers
const IDENTIFY_PREFIX: &str = "ratelimit:identify:";
/// Key holding the global lockout
const GLOBAL_KEY: &str = "ratelimit:global";

/// Idle buckets are dropped this long after their window resets
const BUCKET_IDLE_TTL_MS: u64 = 10 * 60 * 1000;
/// Bucket hash aliases are kept for a day
const HASH_TTL_SECS: u64 = 24 * 60 * 60;

/// KEYS[1] bucket, ARGV[1] now (ms), ARGV[2] wait when the next reset is unknown (ms)
/// Returns {admit, retry_after_ms}.
const DECREMENT_SCRIPT: &str = r"
local state = redis.call('HMGET', KEYS[1], 'limit', 'remaining', 'reset_at')
if not state[1] then
  return {1, 0}
end
local limit = tonumber(state[1])
local remaining = tonumber(state[2])
local reset_at = tonumber(state[3])
local now = tonumber(ARGV[1])
if reset_at > 0 and now >= reset_at then
  remaining = limit
  reset_at = 0
  redis.call('HSET', KEYS[1], 'reset_at', 0)
end
if remaining > 0 then
  redis.call('HSET', KEYS[1], 'remaining', remaining - 1)
  return {1, 0}
end
if reset_at == 0 then
  return {0, tonumber(ARGV[2])}
end
return {0, reset_at - now}
";

/// KEYS[1] bucket, ARGV: limit, remaining, reset_at (ms), now (ms), ttl (ms)
/// A `reset_at` of 0 marks a locally refilled window that no response has
/// reported yet; tokens spent in it still count.
const SET_STATE_SCRIPT: &str = r"
local current = redis.call('HMGET', KEYS[1], 'remaining', 'reset_at')
local remaining = tonumber(ARGV[2])
local reset_at = tonumber(current[2])
if current[1] and reset_at and (reset_at == 0 or reset_at > tonumber(ARGV[4])) then
  remaining = math.min(remaining, tonumber(current[1]))
end
redis.call('HSET', KEYS[1], 'limit', ARGV[1], 'remaining', remaining, 'reset_at', ARGV[3])
redis.call('PEXPIRE', KEYS[1], ARGV[5])
return remaining
";

/// KEYS[1] global key, ARGV[1] lockout (ms). Never shortens an active lockout.
const SET_GLOBAL_SCRIPT: &str = r"
local ttl = redis.call('PTTL', KEYS[1])
if ttl < tonumber(ARGV[1]) then
  redis.call('SET', KEYS[1], '1', 'PX', ARGV[1])
end
return 1
";

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Wait implied by a held handshake marker's `PTTL`.
///
/// `-2` means the marker expired since the failed SET, so the caller retries
/// at once. `-1` is a marker without expiry that this store never writes;
/// waiting out a full cooldown keeps the retry loop from spinning on it.
fn handshake_wait(pttl: i64, cooldown: Duration) -> Duration {
    match pttl {
        -1 => cooldown,
        ttl => Duration::from_millis(ttl.max(0) as u64),
    }
}

/// Redis store shared by every process using one account
pub struct RedisStore {
    pool: RedisPool,
    decrement: Script,
    set_state: Script,
    set_global: Script,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").field("pool", &self.pool).finish()
    }
}

impl RedisStore {
    #[must_use]
    pub fn new(pool: RedisPool) -> Self {
        Self {
            pool,
            decrement: Script::new(DECREMENT_SCRIPT),
            set_state: Script::new(SET_STATE_SCRIPT),
            set_global: Script::new(SET_GLOBAL_SCRIPT),
        }
    }

    fn bucket_key(key: &str) -> String {
        format!("{BUCKET_PREFIX}{key}")
    }

    fn hash_key(route_key: &str) -> String {
        format!("{HASH_PREFIX}{route_key}")
    }

    fn identify_key(shard_bucket: u32) -> String {
        format!("{IDENTIFY_PREFIX}{shard_bucket}")
    }
}

#[async_trait]
impl RateLimitStore for RedisStore {
    async fn get_and_decrement(&self, key: &str) -> StoreResult<Admission> {
        let mut conn = self.pool.get().await?;
        let (admit, retry_after_ms): (i64, i64) = self
            .decrement
            .key(Self::bucket_key(key))
            .arg(now_ms())
            .arg(millis(PENDING_RESET_WAIT))
            .invoke_async(&mut conn)
            .await?;

        Ok(if admit == 1 {
            Admission::granted()
        } else {
            Admission::wait(Duration::from_millis(retry_after_ms.max(0) as u64))
        })
    }

    async fn set_bucket_state(&self, key: &str, update: BucketUpdate) -> StoreResult<()> {
        let now = now_ms();
        let reset_after = millis(update.reset_after);
        let mut conn = self.pool.get().await?;
        let _: i64 = self
            .set_state
            .key(Self::bucket_key(key))
            .arg(update.limit)
            .arg(update.remaining)
            .arg(now + reset_after as i64)
            .arg(now)
            .arg(reset_after + BUCKET_IDLE_TTL_MS)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn get_global_retry_after(&self) -> StoreResult<Option<Duration>> {
        let mut conn = self.pool.get().await?;
        let ttl: i64 = conn.pttl(GLOBAL_KEY).await?;
        // -2: no key, -1: no expiry (never written that way)
        Ok((ttl > 0).then(|| Duration::from_millis(ttl as u64)))
    }

    async fn set_global_retry_after(&self, retry_after: Duration) -> StoreResult<()> {
        let mut conn = self.pool.get().await?;
        let _: i64 = self
            .set_global
            .key(GLOBAL_KEY)
            .arg(millis(retry_after).max(1))
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn bucket_hash(&self, route_key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.pool.get().await?;
        let hash: Option<String> = conn.get(Self::hash_key(route_key)).await?;
        Ok(hash)
    }

    async fn set_bucket_hash(&self, route_key: &str, hash: &str) -> StoreResult<()> {
        let mut conn = self.pool.get().await?;
        conn.set_ex::<_, _, ()>(Self::hash_key(route_key), hash, HASH_TTL_SECS)
            .await?;
        Ok(())
    }

    async fn try_acquire_handshake_slot(
        &self,
        shard_bucket: u32,
        cooldown: Duration,
    ) -> StoreResult<Option<Duration>> {
        let key = Self::identify_key(shard_bucket);
        let mut conn = self.pool.get().await?;

        let acquired: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(1)
            .arg("NX")
            .arg("PX")
            .arg(millis(cooldown).max(1))
            .query_async(&mut conn)
            .await?;

        match acquired.as_deref() {
            Some("OK") => Ok(None),
            Some(other) => Err(StoreError::UnexpectedReply(format!(
                "SET NX on {key} returned {other}"
            ))),
            None => {
                let ttl: i64 = conn.pttl(&key).await?;
                Ok(Some(handshake_wait(ttl, cooldown)))
            }
        }
    }
}
