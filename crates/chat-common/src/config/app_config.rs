//! Client configuration structs
//!
//! Loads configuration for the gateway shards, the REST dispatcher and the
//! rate-limit backend from environment variables (and `.env`, if present).

use serde::Deserialize;
use std::env;
use std::str::FromStr;

/// Main client configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub app: AppSettings,
    pub gateway: GatewaySettings,
    pub rest: RestSettings,
    pub rate_limit: RateLimitSettings,
    pub redis: Option<RedisConfig>,
}

/// General application settings
#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_env")]
    pub env: Environment,
    /// Authentication token shared by the gateway and REST clients
    pub token: String,
}

/// Environment type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    #[must_use]
    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }

    fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "production" => Some(Self::Production),
            "staging" => Some(Self::Staging),
            "development" => Some(Self::Development),
            _ => None,
        }
    }
}

/// Gateway (websocket) settings
#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySettings {
    pub url: String,
    #[serde(default = "default_shard_count")]
    pub shard_count: u32,
    #[serde(default = "default_large_threshold")]
    pub large_threshold: u32,
    #[serde(default)]
    pub intents: u64,
    #[serde(default)]
    pub compress: bool,
}

/// REST dispatcher settings
#[derive(Debug, Clone, Deserialize)]
pub struct RestSettings {
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_timeout_ms")]
    pub timeout_ms: u64,
}

/// Which accounting store backs the rate limiter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitBackend {
    /// Single-process, in-memory counters
    #[default]
    Memory,
    /// Shared redis store, for several processes using one account
    Redis,
}

impl FromStr for RateLimitBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            other => Err(format!("unknown rate limit backend `{other}`")),
        }
    }
}

/// Rate limiter settings
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default)]
    pub backend: RateLimitBackend,
    #[serde(default = "default_identify_cooldown_ms")]
    pub identify_cooldown_ms: u64,
    #[serde(default = "default_identify_concurrency")]
    pub identify_concurrency: u32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

/// Redis configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    #[serde(default = "default_redis_max_connections")]
    pub max_connections: u32,
}

// Default value functions
fn default_app_name() -> String {
    "chat-client".to_string()
}

fn default_env() -> Environment {
    Environment::Development
}

fn default_shard_count() -> u32 {
    1
}

fn default_large_threshold() -> u32 {
    250
}

fn default_api_base_url() -> String {
    "http://127.0.0.1:8080/api/v10".to_string()
}

fn default_api_timeout_ms() -> u64 {
    5_000
}

fn default_identify_cooldown_ms() -> u64 {
    6_000
}

fn default_identify_concurrency() -> u32 {
    1
}

fn default_max_attempts() -> u32 {
    64
}

fn default_redis_max_connections() -> u32 {
    10
}

/// Read an optional variable, failing only when it is present but unparsable.
fn parse_var<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => Ok(Some(value)),
            Err(_) => Err(ConfigError::InvalidValue(name, raw)),
        },
        Err(_) => Ok(None),
    }
}

impl ClientConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if required environment variables are missing or malformed
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let rate_limit = RateLimitSettings {
            backend: parse_var("RATE_LIMIT_BACKEND")?.unwrap_or_default(),
            identify_cooldown_ms: parse_var("IDENTIFY_COOLDOWN_MS")?
                .unwrap_or_else(default_identify_cooldown_ms),
            identify_concurrency: parse_var("IDENTIFY_CONCURRENCY")?
                .unwrap_or_else(default_identify_concurrency),
            max_attempts: parse_var("RATE_LIMIT_MAX_ATTEMPTS")?.unwrap_or_else(default_max_attempts),
        };

        if rate_limit.identify_concurrency == 0 {
            return Err(ConfigError::InvalidValue("IDENTIFY_CONCURRENCY", "0".to_string()));
        }

        let redis = match env::var("REDIS_URL") {
            Ok(url) => Some(RedisConfig {
                url,
                max_connections: parse_var("REDIS_MAX_CONNECTIONS")?
                    .unwrap_or_else(default_redis_max_connections),
            }),
            Err(_) if rate_limit.backend == RateLimitBackend::Redis => {
                return Err(ConfigError::MissingVar("REDIS_URL"));
            }
            Err(_) => None,
        };

        let shard_count: u32 = parse_var("SHARD_COUNT")?.unwrap_or_else(default_shard_count);
        if shard_count == 0 {
            return Err(ConfigError::InvalidValue("SHARD_COUNT", "0".to_string()));
        }

        Ok(Self {
            app: AppSettings {
                name: env::var("APP_NAME").unwrap_or_else(|_| default_app_name()),
                env: env::var("APP_ENV")
                    .ok()
                    .and_then(|s| Environment::parse(&s))
                    .unwrap_or_default(),
                token: env::var("BOT_TOKEN").map_err(|_| ConfigError::MissingVar("BOT_TOKEN"))?,
            },
            gateway: GatewaySettings {
                url: env::var("GATEWAY_URL").map_err(|_| ConfigError::MissingVar("GATEWAY_URL"))?,
                shard_count,
                large_threshold: parse_var("GATEWAY_LARGE_THRESHOLD")?
                    .unwrap_or_else(default_large_threshold),
                intents: parse_var("GATEWAY_INTENTS")?.unwrap_or_default(),
                compress: parse_var("GATEWAY_COMPRESS")?.unwrap_or_default(),
            },
            rest: RestSettings {
                base_url: env::var("API_BASE_URL").unwrap_or_else(|_| default_api_base_url()),
                timeout_ms: parse_var("API_TIMEOUT_MS")?.unwrap_or_else(default_api_timeout_ms),
            },
            rate_limit,
            redis,
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}
