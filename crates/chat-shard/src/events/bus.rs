//! Event listener registry
//!
//! Owned by the shard manager and shared with every shard. Listeners may be
//! registered at any time, including before any shard connects.

use super::{DispatchEvent, EventType};
use crate::connection::Shard;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Receives dispatched events of the types it was registered for
///
/// Handlers run inline on the shard's reader, one after another; long work
/// should be spawned so the reader keeps up with the socket.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, shard: Arc<Shard>, event: Arc<DispatchEvent>);
}

#[async_trait]
impl<F, Fut> EventHandler for F
where
    F: Fn(Arc<Shard>, Arc<DispatchEvent>) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    async fn handle(&self, shard: Arc<Shard>, event: Arc<DispatchEvent>) {
        (self)(shard, event).await;
    }
}

/// Listeners keyed by event type
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<EventType, Vec<Arc<dyn EventHandler>>>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.read();
        f.debug_struct("EventBus")
            .field("event_types", &handlers.len())
            .finish()
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `kind`; handlers run in registration order
    pub fn on<H>(&self, kind: EventType, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.handlers
            .write()
            .entry(kind)
            .or_default()
            .push(Arc::new(handler));
        tracing::debug!(event = %kind, "Event handler registered");
    }

    pub fn handler_count(&self, kind: EventType) -> usize {
        self.handlers.read().get(&kind).map_or(0, Vec::len)
    }

    /// Run every handler registered for the event's type.
    ///
    /// Returns how many handlers ran.
    pub async fn dispatch(&self, shard: &Arc<Shard>, event: DispatchEvent) -> usize {
        let handlers = match self.handlers.read().get(&event.kind) {
            Some(handlers) => handlers.clone(),
            None => return 0,
        };

        let event = Arc::new(event);
        for handler in &handlers {
            handler.handle(Arc::clone(shard), Arc::clone(&event)).await;
        }
        handlers.len()
    }
}
