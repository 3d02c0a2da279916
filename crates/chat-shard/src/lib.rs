//! # chat-shard
//!
//! Sharded gateway client. Each [`Shard`] keeps one socket alive: it
//! identifies or resumes, sends heartbeats, and reconnects with the right
//! session when the connection drops. A [`ShardManager`] runs every shard of
//! one client and fans dispatched events out to registered listeners.

pub mod connection;
pub mod error;
pub mod events;
pub mod manager;
pub mod protocol;

pub use connection::{ConnectionState, Shard, ShardConfig};
pub use error::{ShardError, ShardResult};
pub use events::{DispatchEvent, EventBus, EventHandler, EventType, ReadyEvent};
pub use manager::{shard_id_for_guild, ShardManager};
