//! Event bus for inter-component communication
//!
//! Uses tokio::sync::broadcast for pub/sub pattern. Duck lifecycle edges
//! travel here so the router can fan them out to sibling zones, and the
//! supervisor uses it to announce shutdown.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::zone::duck::DuckKind;

/// Event types that can be published on the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum BusEvent {
    /// A zone began ducking for a speech or video trigger.
    DuckStarted {
        zone: String,
        trigger_id: String,
        kind: DuckKind,
        adjust: Option<i32>,
    },
    /// A zone released a duck trigger.
    DuckEnded { zone: String, trigger_id: String },
    /// Graceful shutdown announcement.
    ShuttingDown { reason: Option<String> },
}

/// Event bus handle for publishing and subscribing
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BusEvent>,
}

impl EventBus {
    /// Create a new event bus with specified capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: BusEvent) {
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.sender.subscribe()
    }

    /// Get the number of current subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Shared event bus wrapped in Arc for thread-safe sharing
pub type SharedBus = Arc<EventBus>;

/// Create a new shared event bus with default capacity (256 events)
pub fn create_bus() -> SharedBus {
    Arc::new(EventBus::new(256))
}
