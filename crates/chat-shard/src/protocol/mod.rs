//! Gateway protocol definitions
//!
//! Op codes, the message envelope, handshake payloads and close codes.

pub mod close_codes;
mod messages;
mod opcodes;
mod payloads;

pub use close_codes::{CloseCode, RESUMABLE_CLOSE};
pub use messages::{GatewayMessage, InboundFrame};
pub use opcodes::OpCode;
pub use payloads::{
    HelloPayload, IdentifyPayload, IdentifyProperties, PresenceUpdatePayload, ResumePayload,
};
