//! Gateway connections
//!
//! One [`Shard`] per connection, plus the session and heartbeat state it
//! carries between frames and across reconnects.

mod config;
mod heartbeat;
mod session;
mod shard;
mod state;

pub use config::ShardConfig;
pub use heartbeat::{first_heartbeat_delay, HeartbeatCheck, HeartbeatState};
pub use session::{Handshake, SessionInfo};
pub use shard::Shard;
pub use state::ConnectionState;
