//! Gateway events
//!
//! Dispatch event names, the payloads handed to listeners, and the
//! listener registry.

mod bus;
mod event_types;
mod payloads;

pub use bus::{EventBus, EventHandler};
pub use event_types::EventType;
pub use payloads::{DispatchEvent, ReadyEvent};
