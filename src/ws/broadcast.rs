//! Per-user status broadcast channel.
//!
//! A process-wide registry of live WebSocket connections, keyed by user id.
//! Delivery is intentionally best-effort: this is a live progress feed, not a
//! durable event log. No buffering, no retry — a user with no open connection
//! simply misses the event.

use crate::core::types::StatusEvent;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

struct Registered {
    connection_id: Uuid,
    tx: mpsc::UnboundedSender<StatusEvent>,
}

/// Constructed once at server start, owned by `AppState`, torn down with the
/// process. At most one entry per user id — the latest registration wins.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<i64, Registered>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `user_id` to a live connection, replacing any prior entry.
    pub fn register(&self, user_id: i64, connection_id: Uuid, tx: mpsc::UnboundedSender<StatusEvent>) {
        let previous = self.connections.insert(user_id, Registered { connection_id, tx });
        match previous {
            Some(_) => info!(user_id, "connection replaced by a newer registration"),
            None => debug!(user_id, %connection_id, "connection registered"),
        }
    }

    /// Push one event to the user's live connection, if any.
    ///
    /// At-most-once: an absent connection or a closed receiver drops the
    /// event with a single warning.
    pub fn publish(&self, user_id: i64, event: StatusEvent) {
        match self.connections.get(&user_id) {
            Some(entry) => {
                if entry.tx.send(event).is_err() {
                    warn!(user_id, "live connection receiver is gone; dropping status event");
                }
            }
            None => {
                warn!(user_id, "no live connection; dropping status event");
            }
        }
    }

    /// Remove the entry for `user_id` — but only when it still belongs to the
    /// closing connection. A replaced connection closing late must not evict
    /// its replacement.
    pub fn unregister(&self, user_id: i64, connection_id: Uuid) {
        let removed = self
            .connections
            .remove_if(&user_id, |_, entry| entry.connection_id == connection_id);
        if removed.is_some() {
            debug!(user_id, %connection_id, "connection unregistered");
        }
    }

    pub fn is_connected(&self, user_id: i64) -> bool {
        self.connections.contains_key(&user_id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> StatusEvent {
        StatusEvent::new("onus-reais", "step", "clicked #btnSolicitar")
    }

    #[tokio::test]
    async fn publish_without_a_connection_drops_the_event() {
        let registry = ConnectionRegistry::new();
        // Returns normally; nothing to assert beyond not panicking and the
        // registry staying empty.
        registry.publish(42, event());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn latest_registration_wins() {
        let registry = ConnectionRegistry::new();
        let (tx_old, mut rx_old) = mpsc::unbounded_channel();
        let (tx_new, mut rx_new) = mpsc::unbounded_channel();

        registry.register(7, Uuid::new_v4(), tx_old);
        registry.register(7, Uuid::new_v4(), tx_new);
        assert_eq!(registry.len(), 1);

        registry.publish(7, event());
        assert!(rx_new.try_recv().is_ok(), "newest connection receives");
        assert!(rx_old.try_recv().is_err(), "replaced connection does not");
    }

    #[tokio::test]
    async fn stale_unregister_does_not_evict_the_replacement() {
        let registry = ConnectionRegistry::new();
        let stale_id = Uuid::new_v4();
        let fresh_id = Uuid::new_v4();
        let (tx_stale, _rx_stale) = mpsc::unbounded_channel();
        let (tx_fresh, mut rx_fresh) = mpsc::unbounded_channel();

        registry.register(7, stale_id, tx_stale);
        registry.register(7, fresh_id, tx_fresh);

        // The old connection closes after being replaced.
        registry.unregister(7, stale_id);
        assert!(registry.is_connected(7));

        registry.publish(7, event());
        assert!(rx_fresh.try_recv().is_ok());

        registry.unregister(7, fresh_id);
        assert!(!registry.is_connected(7));
    }

    #[tokio::test]
    async fn publish_to_a_closed_receiver_degrades_to_a_drop() {
        let registry = ConnectionRegistry::new();
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        registry.register(3, Uuid::new_v4(), tx);
        registry.publish(3, event());
    }
}
