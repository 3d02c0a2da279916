//! Shard configuration

use crate::protocol::{IdentifyProperties, PresenceUpdatePayload};
use chat_common::ClientConfig;
use rand::Rng;
use std::time::Duration;

/// Settings shared by every shard of one manager
#[derive(Debug, Clone)]
pub struct ShardConfig {
    /// Gateway websocket URL
    pub url: String,
    pub token: String,
    pub shard_count: u32,
    pub large_threshold: u32,
    pub intents: u64,
    /// Sent in Identify; compressed frames are not decoded
    pub compress: bool,
    pub properties: IdentifyProperties,
    /// Initial presence sent with Identify
    pub presence: Option<PresenceUpdatePayload>,
    /// How long to wait for Hello after the socket opens
    pub hello_timeout: Duration,
    /// Reconnect automatically after a lost connection
    pub auto_reconnect: bool,
    /// First delay between failed reconnect attempts
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8081/?v=10&encoding=json".to_string(),
            token: String::new(),
            shard_count: 1,
            large_threshold: 250,
            intents: 0,
            compress: false,
            properties: IdentifyProperties::default(),
            presence: None,
            hello_timeout: Duration::from_secs(20),
            auto_reconnect: true,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
        }
    }
}

impl From<&ClientConfig> for ShardConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            url: config.gateway.url.clone(),
            token: config.app.token.clone(),
            shard_count: config.gateway.shard_count.max(1),
            large_threshold: config.gateway.large_threshold,
            intents: config.gateway.intents,
            compress: config.gateway.compress,
            properties: IdentifyProperties::for_library(config.app.name.clone()),
            ..Self::default()
        }
    }
}

/// Exponential backoff with jitter between reconnect attempts
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub(crate) fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            attempt: 0,
        }
    }

    /// Next delay: `base * 2^attempt` capped at `max`, then scaled by a
    /// random factor in `[0.5, 1.0]`.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let factor = 2u32.saturating_pow(self.attempt.min(16));
        self.attempt = self.attempt.saturating_add(1);
        let delay = self.base.saturating_mul(factor).min(self.max);
        delay.mul_f64(rand::thread_rng().gen_range(0.5..=1.0))
    }
}
