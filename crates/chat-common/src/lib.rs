//! # chat-common
//!
//! Shared utilities for the gateway and REST clients: configuration and telemetry.

pub mod config;
pub mod telemetry;

// Re-export commonly used types at crate root
pub use config::{
    AppSettings, ClientConfig, ConfigError, Environment, GatewaySettings, RateLimitBackend,
    RateLimitSettings, RedisConfig, RestSettings,
};
pub use telemetry::{
    try_init_tracing, try_init_tracing_for, try_init_tracing_with_config, TracingConfig,
    TracingError,
};
