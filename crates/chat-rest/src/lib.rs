//! # chat-rest
//!
//! Rate-limit-aware dispatcher for the REST API.
//!
//! ## Example
//!
//! ```ignore
//! use chat_rest::{Endpoint, RequestBody, RestClient, RestConfig};
//! use chat_ratelimit::RateLimitRoute;
//!
//! let client = RestClient::new(RestConfig::from(&config))?.with_rate_limiter(limiter);
//!
//! let endpoint = Endpoint::post(
//!     format!("/channels/{channel_id}/messages"),
//!     RateLimitRoute::channel(channel_id),
//! );
//! let message: serde_json::Value = client
//!     .request(&endpoint, RequestBody::json(&json!({"content": "hi"}))?)
//!     .await?;
//! ```

pub mod body;
pub mod client;
pub mod endpoint;
pub mod error;
pub mod headers;

pub use body::{Attachment, RequestBody};
pub use client::{RestClient, RestConfig};
pub use endpoint::Endpoint;
pub use error::{ApiError, RestError, RestResult};
pub use headers::parse_rate_limit_headers;
