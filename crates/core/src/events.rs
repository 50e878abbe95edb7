//! Registry change notifications
//!
//! The registry reports adapters being added and removed to an optional
//! [`EventSink`]. Health checks and metrics hang off this; routing itself
//! never depends on a sink being present.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Added,
    Removed,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Added => write!(f, "added"),
            EventKind::Removed => write!(f, "removed"),
        }
    }
}

/// An adapter was added to or removed from the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEvent {
    pub backend: String,
    pub kind: EventKind,
}

impl RegistryEvent {
    pub fn added(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            kind: EventKind::Added,
        }
    }

    pub fn removed(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            kind: EventKind::Removed,
        }
    }
}

/// Receives registry events
#[cfg_attr(test, mockall::automock)]
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &RegistryEvent);
}

/// Fans events out to any number of subscribers
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<RegistryEvent>,
}

impl BroadcastSink {
    /// Sink buffering up to `capacity` events per slow subscriber (at least one)
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(64)
    }
}

impl EventSink for BroadcastSink {
    fn publish(&self, event: &RegistryEvent) {
        // No subscribers is not an error
        let _ = self.sender.send(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_sink_delivers() {
        let sink = BroadcastSink::default();
        let mut rx = sink.subscribe();

        sink.publish(&RegistryEvent::added("s3a"));
        sink.publish(&RegistryEvent::removed("s3a"));

        assert_eq!(rx.recv().await.unwrap(), RegistryEvent::added("s3a"));
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::Removed);
    }

    #[tokio::test]
    async fn test_zero_capacity_holds_one_event() {
        let sink = BroadcastSink::new(0);
        let mut rx = sink.subscribe();
        sink.publish(&RegistryEvent::added("s3a"));
        assert_eq!(rx.recv().await.unwrap(), RegistryEvent::added("s3a"));
    }

    #[test]
    fn test_publish_without_subscribers() {
        let sink = BroadcastSink::new(4);
        sink.publish(&RegistryEvent::added("s3a"));
    }
}
