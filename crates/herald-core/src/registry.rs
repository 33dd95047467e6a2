//! The authoritative set of live connections.
//!
//! Membership changes (register, unregister) are applied by the hub loop.
//! Targeted deliveries iterate under the read lock; connections whose queue
//! turned out to be full are evicted under the write lock once the read
//! lock has been released.

use crate::connection::{Connection, ConnectionId, ConnectionInfo, EnqueueError};
use crate::metrics;
use herald_protocol::Encoded;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Connection registry.
#[derive(Debug, Default)]
pub struct Registry {
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection. Returns `false` if the id is already present.
    pub fn insert(&self, connection: Arc<Connection>) -> bool {
        let mut connections = self.connections.write();
        if connections.contains_key(connection.id()) {
            return false;
        }
        connections.insert(connection.id().clone(), connection);
        true
    }

    /// Remove a connection by id.
    pub fn remove(&self, id: &str) -> Option<Arc<Connection>> {
        self.connections.write().remove(id)
    }

    /// Look up a connection by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Connection>> {
        self.connections.read().get(id).cloned()
    }

    /// Check whether an id is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.connections.read().contains_key(id)
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// Whether no connection is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Snapshot of every registered connection, ordered by id.
    #[must_use]
    pub fn infos(&self) -> Vec<ConnectionInfo> {
        let mut infos: Vec<ConnectionInfo> = self
            .connections
            .read()
            .values()
            .map(|c| c.info())
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// Remove every connection, returning them.
    pub fn drain(&self) -> Vec<Arc<Connection>> {
        self.connections.write().drain().map(|(_, c)| c).collect()
    }

    /// Queue `encoded` on every connection accepted by `filter`.
    ///
    /// Returns the number of connections the event was queued for.
    pub fn deliver<F>(&self, encoded: &Arc<Encoded>, filter: F) -> usize
    where
        F: Fn(&Connection) -> bool,
    {
        let mut delivered = 0;
        let mut saturated = Vec::new();

        {
            let connections = self.connections.read();
            for connection in connections.values().filter(|c| filter(c)) {
                match connection.try_enqueue(Arc::clone(encoded)) {
                    Ok(()) => delivered += 1,
                    Err(EnqueueError::Full) => saturated.push(Arc::clone(connection)),
                    Err(EnqueueError::Closed) => {
                        debug!(connection = %connection.id(), "Skipping closed connection");
                    }
                }
            }
        }

        for connection in saturated {
            self.evict(&connection);
        }

        delivered
    }

    /// Queue `encoded` on a single connection. A missing id is a no-op.
    ///
    /// Returns whether the event was queued.
    pub fn deliver_to(&self, id: &str, encoded: &Arc<Encoded>) -> bool {
        let Some(connection) = self.get(id) else {
            debug!(connection = %id, "Target connection not registered");
            return false;
        };

        match connection.try_enqueue(Arc::clone(encoded)) {
            Ok(()) => true,
            Err(EnqueueError::Full) => {
                self.evict(&connection);
                false
            }
            Err(EnqueueError::Closed) => false,
        }
    }

    /// Drop a slow consumer: remove it and close its queue.
    fn evict(&self, connection: &Arc<Connection>) {
        {
            let mut connections = self.connections.write();
            let current = connections
                .get(connection.id())
                .is_some_and(|c| Arc::ptr_eq(c, connection));
            if current {
                connections.remove(connection.id());
            }
        }

        if connection.close() {
            warn!(connection = %connection.id(), "Outbound queue full, evicting connection");
            metrics::record_eviction();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::sync::mpsc;

    fn payload() -> Arc<Encoded> {
        Arc::new(Encoded::Binary(Bytes::from_static(b"e")))
    }

    fn registered(
        registry: &Registry,
        capacity: usize,
    ) -> (Arc<Connection>, mpsc::Receiver<Arc<Encoded>>) {
        let (conn, rx) = Connection::new(capacity);
        assert!(registry.insert(Arc::clone(&conn)));
        (conn, rx)
    }

    #[test]
    fn test_insert_remove() {
        let registry = Registry::new();
        let (conn, _rx) = registered(&registry, 4);

        assert!(!registry.insert(Arc::clone(&conn)));
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(conn.id().as_str()));

        assert!(registry.remove(conn.id().as_str()).is_some());
        assert!(registry.remove(conn.id().as_str()).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_deliver_with_filter() {
        let registry = Registry::new();
        let (a, mut rx_a) = registered(&registry, 4);
        let (_b, mut rx_b) = registered(&registry, 4);
        a.join_group("admins");

        let delivered = registry.deliver(&payload(), |c| c.in_group("admins"));

        assert_eq!(delivered, 1);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_full_queue_evicts() {
        let registry = Registry::new();
        let (slow, mut rx_slow) = registered(&registry, 1);
        let (_fast, mut rx_fast) = registered(&registry, 8);

        assert_eq!(registry.deliver(&payload(), |_| true), 2);
        rx_fast.try_recv().unwrap();

        // Second event overflows the slow connection only.
        assert_eq!(registry.deliver(&payload(), |_| true), 1);

        assert!(!registry.contains(slow.id().as_str()));
        assert!(slow.is_closed());
        assert_eq!(registry.len(), 1);
        assert!(rx_fast.try_recv().is_ok());

        // The slow reader still drains what it had, then sees the close.
        assert!(rx_slow.try_recv().is_ok());
        assert!(matches!(
            rx_slow.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_deliver_to_missing_is_noop() {
        let registry = Registry::new();
        assert!(!registry.deliver_to("nope", &payload()));
    }

    #[test]
    fn test_deliver_to_evicts_on_full() {
        let registry = Registry::new();
        let (conn, _rx) = registered(&registry, 1);
        let id = conn.id().to_string();

        assert!(registry.deliver_to(&id, &payload()));
        assert!(!registry.deliver_to(&id, &payload()));
        assert!(!registry.contains(&id));
    }

    #[test]
    fn test_infos_and_drain() {
        let registry = Registry::new();
        let (a, _ra) = registered(&registry, 1);
        let (_b, _rb) = registered(&registry, 1);
        a.set_user_id(5);

        let infos = registry.infos();
        assert_eq!(infos.len(), 2);
        assert!(infos.windows(2).all(|w| w[0].id <= w[1].id));
        assert!(infos.iter().any(|i| i.user_id == Some(5)));

        let drained = registry.drain();
        assert_eq!(drained.len(), 2);
        assert!(registry.is_empty());
    }
}
