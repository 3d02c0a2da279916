//! Heartbeat bookkeeping
//!
//! Pure state: the monitor task in `shard.rs` asks [`HeartbeatState::check`]
//! on every tick and acts on the answer.

use std::time::Duration;
use tokio::time::Instant;

/// What the monitor should do on this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatCheck {
    /// Send the next heartbeat
    Send,
    /// The previous heartbeat went unacknowledged for a full interval
    Zombie,
}

/// Send and acknowledgement times for one connection
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatState {
    interval: Duration,
    last_sent: Option<Instant>,
    last_ack: Option<Instant>,
}

impl HeartbeatState {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: None,
            last_ack: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Forget every heartbeat; used when a new connection starts
    pub fn reset(&mut self, interval: Duration) {
        *self = Self::new(interval);
    }

    /// Change the period without forgetting the outstanding heartbeat
    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    pub fn has_sent(&self) -> bool {
        self.last_sent.is_some()
    }

    fn acked_since_last_send(&self) -> bool {
        match (self.last_sent, self.last_ack) {
            (Some(sent), Some(ack)) => ack >= sent,
            _ => false,
        }
    }

    /// Zombie iff a heartbeat was sent, no ack arrived after it, and a full
    /// interval has passed since it went out.
    pub fn check(&self, now: Instant) -> HeartbeatCheck {
        match self.last_sent {
            Some(sent)
                if !self.acked_since_last_send()
                    && now.saturating_duration_since(sent) >= self.interval =>
            {
                HeartbeatCheck::Zombie
            }
            _ => HeartbeatCheck::Send,
        }
    }

    pub fn record_sent(&mut self, at: Instant) {
        self.last_sent = Some(at);
    }

    pub fn record_ack(&mut self, at: Instant) {
        self.last_ack = Some(at);
    }

    /// Round trip of the last acknowledged heartbeat
    pub fn latency(&self) -> Option<Duration> {
        if !self.acked_since_last_send() {
            return None;
        }
        match (self.last_sent, self.last_ack) {
            (Some(sent), Some(ack)) => Some(ack - sent),
            _ => None,
        }
    }
}

/// Delay before the first heartbeat: a random fraction of one interval, so
/// shards started together don't beat in lockstep.
pub fn first_heartbeat_delay(interval: Duration) -> Duration {
    interval.mul_f64(rand::random::<f64>())
}
