use super::{Connection, EventFrame};
use crate::ids::ConnectionId;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Registry of open connections with the outbound send primitives.
///
/// Targeted sends match on identity id, so every connection of one identity
/// receives the frame.
#[derive(Clone, Default)]
pub struct ConnectionHub {
    connections: Arc<DashMap<ConnectionId, Connection>>,
}

impl std::fmt::Debug for ConnectionHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHub")
            .field("connections", &self.connections.len())
            .finish()
    }
}

impl ConnectionHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, connection: Connection) {
        self.connections.insert(connection.id(), connection);
    }

    pub(crate) fn unregister(&self, id: ConnectionId) -> Option<Connection> {
        self.connections.remove(&id).map(|(_, c)| c)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Send to every open connection. Returns the number of deliveries.
    pub fn broadcast(&self, event: &str, payload: Value) -> usize {
        self.deliver(event, payload, |_| true)
    }

    /// Send to every connection authenticated as `identity_id`.
    pub fn send_to(&self, identity_id: &str, event: &str, payload: Value) -> usize {
        self.deliver(event, payload, |c| {
            c.identity().map(|i| i.id == identity_id).unwrap_or(false)
        })
    }

    /// Send to every connection whose identity is in `identity_ids`.
    pub fn send_to_many<I, T>(&self, identity_ids: I, event: &str, payload: Value) -> usize
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let wanted: HashSet<String> = identity_ids
            .into_iter()
            .map(|id| id.as_ref().to_string())
            .collect();
        self.deliver(event, payload, |c| {
            c.identity().map(|i| wanted.contains(&i.id)).unwrap_or(false)
        })
    }

    fn deliver<F>(&self, event: &str, payload: Value, matches: F) -> usize
    where
        F: Fn(&Connection) -> bool,
    {
        let frame = EventFrame::outbound(event, payload);
        // Snapshot first so no shard lock is held while sending.
        let targets: Vec<Connection> = self
            .connections
            .iter()
            .filter(|e| matches(e.value()))
            .map(|e| e.value().clone())
            .collect();

        let delivered = targets
            .iter()
            .filter(|c| c.push(frame.clone()))
            .count();
        debug!(event, targets = targets.len(), delivered, "Event sent");
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::OutboundReceiver;
    use crate::security::Identity;
    use serde_json::json;

    fn open(hub: &ConnectionHub, user: Option<&str>) -> (Connection, OutboundReceiver) {
        let (conn, rx) = Connection::open(user.map(|u| Identity::new(u, Value::Null)));
        hub.register(conn.clone());
        (conn, rx)
    }

    #[test]
    fn broadcast_reaches_everyone() {
        let hub = ConnectionHub::new();
        let (_a, rx_a) = open(&hub, Some("ada"));
        let (_b, rx_b) = open(&hub, None);
        assert_eq!(hub.broadcast("news", json!({"n": 1})), 2);
        assert_eq!(rx_a.try_recv().map(|f| f.event), Some("news".to_string()));
        assert_eq!(rx_b.try_recv().map(|f| f.data), Some(json!({"data": {"n": 1}})));
    }

    #[test]
    fn send_to_targets_every_connection_of_identity() {
        let hub = ConnectionHub::new();
        let (_a1, rx_a1) = open(&hub, Some("ada"));
        let (_a2, rx_a2) = open(&hub, Some("ada"));
        let (_b, rx_b) = open(&hub, Some("bob"));

        assert_eq!(hub.send_to("ada", "dm", json!("hi")), 2);
        assert!(rx_a1.try_recv().is_some());
        assert!(rx_a2.try_recv().is_some());
        assert!(rx_b.try_recv().is_none());
    }

    #[test]
    fn send_to_many_matches_id_set() {
        let hub = ConnectionHub::new();
        let (_a, rx_a) = open(&hub, Some("ada"));
        let (_b, rx_b) = open(&hub, Some("bob"));
        let (_c, rx_c) = open(&hub, Some("cy"));

        assert_eq!(hub.send_to_many(["ada", "cy"], "group", json!({})), 2);
        assert!(rx_a.try_recv().is_some());
        assert!(rx_b.try_recv().is_none());
        assert!(rx_c.try_recv().is_some());
    }

    #[test]
    fn unregistered_connections_receive_nothing() {
        let hub = ConnectionHub::new();
        let (a, rx_a) = open(&hub, Some("ada"));
        hub.unregister(a.id());
        assert!(hub.is_empty());
        assert_eq!(hub.broadcast("news", json!({})), 0);
        assert!(rx_a.try_recv().is_none());
    }
}
