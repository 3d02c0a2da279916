//! Dispatch event payloads
//!
//! Payloads are handed to listeners as raw JSON; only `READY` is decoded
//! by the shard itself since it carries the session token.

use super::EventType;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One dispatched event, as delivered to listeners
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchEvent {
    pub kind: EventType,
    pub sequence: Option<u64>,
    pub data: Value,
}

impl DispatchEvent {
    /// Decode the payload into a listener-defined type
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }
}

/// `READY` payload fields the shard needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyEvent {
    /// Gateway protocol version
    #[serde(default)]
    pub v: Option<u8>,
    pub session_id: String,
    /// Where to reconnect when resuming this session
    #[serde(default)]
    pub resume_gateway_url: Option<String>,
    #[serde(default)]
    pub shard: Option<[u32; 2]>,
}
