//! # chat-ratelimit
//!
//! Request admission for the REST dispatcher and handshake spacing for
//! gateway shards.
//!
//! ## Features
//!
//! - **Buckets**: Per-route accounting, re-keyed by server bucket hashes
//! - **Global Lockout**: Account-wide pause honoured before any bucket
//! - **Handshake Slots**: Identify cooldown per shard bucket
//! - **Stores**: In-process `MemoryStore` or shared `RedisStore`
//!
//! ## Example
//!
//! ```ignore
//! use chat_ratelimit::{CoordinatorConfig, RateLimitCoordinator, RateLimitRoute};
//!
//! let limiter = RateLimitCoordinator::in_memory(CoordinatorConfig::default());
//! let route = RateLimitRoute::channel(channel_id);
//!
//! limiter.execute_call(&route).await?;
//! let response = send().await?;
//! limiter.update(&route, &headers_of(&response)).await?;
//! ```

pub mod bucket;
pub mod coordinator;
pub mod error;
pub mod pool;
pub mod route;
pub mod store;

// Re-export bucket types
pub use bucket::{Admission, BucketUpdate, RateLimitHeaders, PENDING_RESET_WAIT};

// Re-export coordinator types
pub use coordinator::{CoordinatorConfig, RateLimitCoordinator};

// Re-export error types
pub use error::{RateLimitError, RateLimitResult, StoreError, StoreResult};

// Re-export pool types
pub use pool::{RedisPool, RedisPoolConfig};

// Re-export route types
pub use route::{RateLimitRoute, RouteKind};

// Re-export store types
pub use store::{MemoryStore, RateLimitStore, RedisStore};
