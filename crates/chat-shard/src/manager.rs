//! Shard manager
//!
//! Owns every shard of one client and the event bus they share.

use crate::connection::{Shard, ShardConfig};
use crate::events::{EventBus, EventHandler, EventType};
use chat_ratelimit::RateLimitCoordinator;
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;

/// Shard a guild's events arrive on: `(guild_id >> 22) % shard_count`
pub fn shard_id_for_guild(guild_id: u64, shard_count: u32) -> u32 {
    ((guild_id >> 22) % u64::from(shard_count.max(1))) as u32
}

/// Runs `shard_count` shards against one gateway
#[derive(Debug)]
pub struct ShardManager {
    shards: Vec<Arc<Shard>>,
    bus: Arc<EventBus>,
}

impl ShardManager {
    /// Create the shards; nothing connects until [`start`](Self::start).
    pub fn new(config: ShardConfig, limiter: Arc<RateLimitCoordinator>) -> Self {
        let shard_count = config.shard_count.max(1);
        let config = Arc::new(ShardConfig {
            shard_count,
            ..config
        });
        let bus = Arc::new(EventBus::new());

        let shards = (0..shard_count)
            .map(|index| {
                Shard::new(
                    index,
                    Arc::clone(&config),
                    Arc::clone(&limiter),
                    Arc::clone(&bus),
                )
            })
            .collect();

        Self { shards, bus }
    }

    /// Register a listener for every shard
    pub fn on<H>(&self, kind: EventType, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.bus.on(kind, handler);
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Connect every shard.
    ///
    /// Identify throttling spaces the handshakes out. A shard that fails
    /// its first attempt keeps retrying in the background.
    pub async fn start(&self) {
        tracing::info!(shard_count = self.shards.len(), "Starting shards");

        let results = join_all(self.shards.iter().map(|shard| shard.connect())).await;
        for (shard, result) in self.shards.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!(
                    shard = shard.index(),
                    error = %e,
                    "Initial connect failed, retrying in background"
                );
                shard.schedule_reconnect();
            }
        }
    }

    /// Close every shard with 1000 and stop reconnecting
    pub async fn shutdown(&self) {
        join_all(self.shards.iter().map(|shard| shard.shutdown())).await;
        tracing::info!(shard_count = self.shards.len(), "All shards shut down");
    }

    pub fn shard(&self, index: u32) -> Option<&Arc<Shard>> {
        self.shards.get(index as usize)
    }

    pub fn shards(&self) -> &[Arc<Shard>] {
        &self.shards
    }

    pub fn shard_count(&self) -> u32 {
        self.shards.len() as u32
    }

    /// The shard that receives events for `guild_id`
    pub fn shard_for_guild(&self, guild_id: u64) -> Option<&Arc<Shard>> {
        self.shard(shard_id_for_guild(guild_id, self.shard_count()))
    }

    /// Heartbeat round trip per shard; `None` until the first ack
    pub fn latencies(&self) -> Vec<(u32, Option<Duration>)> {
        self.shards
            .iter()
            .map(|shard| (shard.index(), shard.latency()))
            .collect()
    }
}
