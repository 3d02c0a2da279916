//! Gateway message format
//!
//! Every frame on the socket is a `{op, s?, t?, d}` envelope. Outgoing
//! frames are built with the constructors below; incoming frames are
//! decoded once into an [`InboundFrame`] and handled by kind.

use super::{HelloPayload, IdentifyPayload, OpCode, PresenceUpdatePayload, ResumePayload};
use crate::error::{ShardError, ShardResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Gateway message envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayMessage {
    pub op: OpCode,

    /// Event name (Dispatch only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,

    /// Sequence number (Dispatch only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,

    /// Payload; always present on the wire, `null` when empty
    #[serde(default)]
    pub d: Value,
}

/// A received frame, decoded by op code
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Dispatch { event: String, data: Value },
    Heartbeat,
    Reconnect,
    /// `resumable` is the `d` flag; a missing flag is treated as resumable
    InvalidSession { resumable: bool },
    Hello(HelloPayload),
    HeartbeatAck,
}

impl GatewayMessage {
    fn new(op: OpCode, d: Value) -> Self {
        Self {
            op,
            t: None,
            s: None,
            d,
        }
    }

    fn with_payload<T: Serialize>(op: OpCode, payload: &T) -> ShardResult<Self> {
        Ok(Self::new(op, serde_json::to_value(payload)?))
    }

    /// Heartbeat (op 1) carrying the last sequence seen, or `null`
    #[must_use]
    pub fn heartbeat(last_sequence: Option<u64>) -> Self {
        Self::new(
            OpCode::Heartbeat,
            last_sequence.map_or(Value::Null, Value::from),
        )
    }

    /// Identify (op 2)
    pub fn identify(payload: &IdentifyPayload) -> ShardResult<Self> {
        Self::with_payload(OpCode::Identify, payload)
    }

    /// Presence Update (op 3)
    pub fn presence_update(payload: &PresenceUpdatePayload) -> ShardResult<Self> {
        Self::with_payload(OpCode::PresenceUpdate, payload)
    }

    /// Resume (op 6)
    pub fn resume(payload: &ResumePayload) -> ShardResult<Self> {
        Self::with_payload(OpCode::Resume, payload)
    }

    pub fn to_json(&self) -> ShardResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> ShardResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Decode the payload by op code.
    ///
    /// Op codes a client never receives are rejected.
    pub fn into_frame(self) -> ShardResult<InboundFrame> {
        match self.op {
            OpCode::Dispatch => {
                let event = self.t.ok_or_else(|| {
                    ShardError::UnexpectedFrame("dispatch without event name".to_string())
                })?;
                Ok(InboundFrame::Dispatch {
                    event,
                    data: self.d,
                })
            }
            OpCode::Heartbeat => Ok(InboundFrame::Heartbeat),
            OpCode::Reconnect => Ok(InboundFrame::Reconnect),
            OpCode::InvalidSession => Ok(InboundFrame::InvalidSession {
                resumable: self.d.as_bool().unwrap_or(true),
            }),
            OpCode::Hello => Ok(InboundFrame::Hello(serde_json::from_value(self.d)?)),
            OpCode::HeartbeatAck => Ok(InboundFrame::HeartbeatAck),
            op => Err(ShardError::UnexpectedFrame(format!("received send-only op {op}"))),
        }
    }
}

impl std::fmt::Display for GatewayMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(t) = &self.t {
            write!(f, "GatewayMessage(op={}, t={}", self.op, t)?;
            if let Some(s) = self.s {
                write!(f, ", s={s}")?;
            }
            write!(f, ")")
        } else {
            write!(f, "GatewayMessage(op={})", self.op)
        }
    }
}
