//! Realtime hub: the publish/subscribe registry between the change bridge
//! and connected WebSocket clients.
//!
//! Delivery is fire-and-forget through per-connection unbounded channels: a
//! slow or gone client never blocks the bridge or the other clients.
//! Broadcast walks the registry once and prunes subscribers whose receiving
//! side has hung up, so a disconnect during a broadcast cannot corrupt
//! anything.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;

/// Handle identifying one connected realtime client.
pub type ConnectionId = u64;

/// Frames pushed to realtime clients, serialized as
/// `{"event": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ChannelEvent {
    /// Greeting, sent once per connection on connect.
    Welcome(String),
    /// One observed task mutation: the task's current full state, or an
    /// `{"id": ..., "deleted": true}` tombstone for deletions.
    TaskUpdate(serde_json::Value),
}

/// Subscriber registry keyed by connection id.
pub struct Hub {
    connections: DashMap<ConnectionId, mpsc::UnboundedSender<ChannelEvent>>,
    next_id: AtomicU64,
}

impl Hub {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Add a subscriber, returning its id and the receiving end of its
    /// channel.
    pub fn register(&self) -> (ConnectionId, mpsc::UnboundedReceiver<ChannelEvent>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.insert(id, tx);
        tracing::debug!(connection_id = id, "realtime client registered");
        (id, rx)
    }

    /// Drop a subscriber. Safe to call for ids already pruned.
    pub fn unregister(&self, id: ConnectionId) {
        if self.connections.remove(&id).is_some() {
            tracing::debug!(connection_id = id, "realtime client unregistered");
        }
    }

    /// Deliver `event` to every current subscriber, pruning dead ones.
    /// Returns how many subscribers were handed the event.
    pub fn broadcast(&self, event: &ChannelEvent) -> usize {
        let mut delivered = 0;
        self.connections.retain(|_, tx| {
            if tx.send(event.clone()).is_ok() {
                delivered += 1;
                true
            } else {
                false
            }
        });
        tracing::trace!(delivered, "broadcast realtime event");
        delivered
    }

    /// Number of currently registered subscribers.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn channel_event_wire_shape() {
        let welcome = ChannelEvent::Welcome("hello".into());
        assert_eq!(
            serde_json::to_value(&welcome).unwrap(),
            json!({"event": "welcome", "data": "hello"})
        );

        let update = ChannelEvent::TaskUpdate(json!({"id": "1", "title": "t"}));
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            json!({"event": "taskUpdate", "data": {"id": "1", "title": "t"}})
        );
    }

    #[tokio::test]
    async fn broadcast_reaches_every_subscriber() {
        let hub = Hub::new();
        let (_a, mut rx_a) = hub.register();
        let (_b, mut rx_b) = hub.register();

        let event = ChannelEvent::TaskUpdate(json!({"id": "1"}));
        assert_eq!(hub.broadcast(&event), 2);

        assert_eq!(rx_a.recv().await.unwrap(), event);
        assert_eq!(rx_b.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn dead_subscribers_are_pruned_during_broadcast() {
        let hub = Hub::new();
        let (_a, rx_a) = hub.register();
        let (_b, mut rx_b) = hub.register();
        assert_eq!(hub.connection_count(), 2);

        drop(rx_a);
        let event = ChannelEvent::TaskUpdate(json!({"id": "1"}));
        assert_eq!(hub.broadcast(&event), 1);
        assert_eq!(hub.connection_count(), 1);
        assert_eq!(rx_b.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let hub = Hub::new();
        let (id, _rx) = hub.register();
        hub.unregister(id);
        hub.unregister(id);
        assert_eq!(hub.connection_count(), 0);
        assert_eq!(hub.broadcast(&ChannelEvent::Welcome("hi".into())), 0);
    }
}
