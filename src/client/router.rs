//! Inbound message routing
//!
//! Messages are delivered to the handler registered for their exact topic.
//! Messages on topics without a registry entry are dropped; that is an
//! expected condition, not an error.

use super::registry::SubscriptionRegistry;
use std::sync::Arc;
use tracing::debug;

/// Outcome of routing one inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// A handler was invoked
    Delivered,
    /// No subscription for the topic; the message was dropped
    Unmatched,
}

/// Dispatches inbound messages to registry handlers
#[derive(Debug, Clone)]
pub struct MessageRouter {
    registry: Arc<SubscriptionRegistry>,
}

impl MessageRouter {
    pub fn new(registry: Arc<SubscriptionRegistry>) -> Self {
        Self { registry }
    }

    /// Payload as text, replacing invalid UTF-8 sequences
    pub fn payload_text(payload: &[u8]) -> String {
        String::from_utf8_lossy(payload).into_owned()
    }

    /// Invoke the handler for `topic` synchronously, if one is registered
    pub async fn dispatch(&self, topic: &str, payload: &[u8]) -> RouteOutcome {
        // Handler is cloned out so the registry lock is not held while user code runs
        let Some(handler) = self.registry.handler(topic).await else {
            debug!(topic = %topic, "No handler registered for topic, dropping message");
            return RouteOutcome::Unmatched;
        };

        debug!(topic = %topic, bytes = payload.len(), "Routing message to handler");
        let text = Self::payload_text(payload);
        handler(topic, &text);
        RouteOutcome::Delivered
    }
}
