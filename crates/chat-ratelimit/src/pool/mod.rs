//! Redis connection pool module.
//!
//! Connection pooling for the distributed rate-limit store.

mod redis_pool;

pub use redis_pool::{RedisPool, RedisPoolConfig};
