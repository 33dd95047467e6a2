//! The hub: one loop that serializes registry membership and broadcasts.
//!
//! Register, unregister and broadcast-to-everyone requests travel through a
//! single bounded command queue and are applied in arrival order. A
//! connection therefore never misses a broadcast queued after its
//! registration completed, and never receives one queued after its
//! unregistration.

use crate::connection::{Connection, ConnectionId, ConnectionInfo, DEFAULT_OUTBOUND_CAPACITY};
use crate::dispatcher::{Dispatcher, EventContext, EventHandler};
use crate::registry::Registry;
use herald_protocol::{encode, Encoded, Encoding, Event, ProtocolError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

/// Default hub command queue capacity.
pub const DEFAULT_COMMAND_CAPACITY: usize = 256;

/// Default interval between protocol-level pings.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(54);

/// Hub errors.
#[derive(Debug, Error)]
pub enum HubError {
    /// The hub loop is no longer running.
    #[error("Hub is not running")]
    Stopped,

    /// An event could not be encoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Outbound queue capacity per connection.
    pub outbound_capacity: usize,
    /// Hub command queue capacity.
    pub command_capacity: usize,
    /// Interval between protocol-level pings. Zero disables pings.
    pub ping_interval: Duration,
    /// Close a connection after this long without any inbound frame.
    pub idle_timeout: Option<Duration>,
    /// Upper bound on a single socket write.
    pub write_timeout: Duration,
    /// Outbound wire encoding.
    pub encoding: Encoding,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            command_capacity: DEFAULT_COMMAND_CAPACITY,
            ping_interval: DEFAULT_PING_INTERVAL,
            idle_timeout: Some(Duration::from_secs(120)),
            write_timeout: Duration::from_secs(10),
            encoding: Encoding::Json,
        }
    }
}

#[derive(Debug)]
enum Command {
    Register {
        connection: Arc<Connection>,
        ack: oneshot::Sender<()>,
    },
    Unregister {
        id: ConnectionId,
        ack: oneshot::Sender<bool>,
    },
    Broadcast(Arc<Encoded>),
    Shutdown {
        ack: oneshot::Sender<usize>,
    },
}

struct Shared {
    registry: Arc<Registry>,
    dispatcher: Dispatcher,
    commands: mpsc::Sender<Command>,
    config: HubConfig,
}

/// Handle to a running hub.
///
/// Cheap to clone; every clone talks to the same loop. The loop stops on
/// [`shutdown`](Hub::shutdown) or once every handle is dropped.
#[derive(Clone)]
pub struct Hub {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("connections", &self.shared.registry.len())
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

/// The hub loop, to be driven by [`HubTask::run`].
#[derive(Debug)]
pub struct HubTask {
    registry: Arc<Registry>,
    commands: mpsc::Receiver<Command>,
    encoding: Encoding,
}

impl Hub {
    /// Create a hub and its loop without starting the loop.
    #[must_use]
    pub fn new(config: HubConfig) -> (Self, HubTask) {
        info!("Creating hub with config: {:?}", config);

        let registry = Arc::new(Registry::new());
        let (tx, rx) = mpsc::channel(config.command_capacity.max(1));
        let task = HubTask {
            registry: Arc::clone(&registry),
            commands: rx,
            encoding: config.encoding,
        };
        let hub = Self {
            shared: Arc::new(Shared {
                registry,
                dispatcher: Dispatcher::new(),
                commands: tx,
                config,
            }),
        };
        (hub, task)
    }

    /// Create a hub and spawn its loop on the current runtime.
    #[must_use]
    pub fn spawn(config: HubConfig) -> Self {
        let (hub, task) = Self::new(config);
        tokio::spawn(task.run());
        hub
    }

    /// Hub configuration.
    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.shared.config
    }

    /// Whether the loop is still accepting commands.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.shared.commands.is_closed()
    }

    pub(crate) fn registry(&self) -> &Registry {
        &self.shared.registry
    }

    pub(crate) fn encode(&self, event: &Event) -> Result<Arc<Encoded>, HubError> {
        Ok(Arc::new(encode(event, self.shared.config.encoding)?))
    }

    /// Register a connection and queue its `connected` greeting.
    ///
    /// Returns once the loop has applied the registration.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Stopped`] if the hub has shut down.
    pub async fn register(&self, connection: Arc<Connection>) -> Result<(), HubError> {
        let (ack, done) = oneshot::channel();
        self.shared
            .commands
            .send(Command::Register { connection, ack })
            .await
            .map_err(|_| HubError::Stopped)?;
        done.await.map_err(|_| HubError::Stopped)
    }

    /// Remove a connection and close its outbound queue.
    ///
    /// Idempotent: returns `true` only if the connection was registered.
    pub async fn unregister(&self, id: &ConnectionId) -> bool {
        let (ack, done) = oneshot::channel();
        let sent = self
            .shared
            .commands
            .send(Command::Unregister {
                id: id.clone(),
                ack,
            })
            .await;
        if sent.is_err() {
            return false;
        }
        done.await.unwrap_or(false)
    }

    /// Queue an already-encoded broadcast without waiting.
    ///
    /// Returns `false` if the command queue is full or the hub stopped.
    pub(crate) fn try_broadcast(&self, encoded: Arc<Encoded>) -> bool {
        match self.shared.commands.try_send(Command::Broadcast(encoded)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Hub command queue full, dropping broadcast");
                crate::metrics::record_dropped_broadcast();
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Hub stopped, dropping broadcast");
                false
            }
        }
    }

    /// Register a handler for an inbound event name.
    ///
    /// Handlers for the same name all run, concurrently, for every event.
    pub fn on_event(&self, name: impl Into<String>, handler: impl EventHandler) {
        self.shared.dispatcher.on(name, Arc::new(handler));
    }

    pub(crate) fn dispatch(&self, connection: Arc<Connection>, event: Event) -> usize {
        let ctx = EventContext {
            hub: self.clone(),
            connection,
        };
        self.shared.dispatcher.dispatch(ctx, event)
    }

    /// Event names that have at least one handler, sorted.
    #[must_use]
    pub fn handled_events(&self) -> Vec<String> {
        self.shared.dispatcher.events()
    }

    /// Snapshot of every registered connection.
    #[must_use]
    pub fn connected_clients(&self) -> Vec<ConnectionInfo> {
        self.shared.registry.infos()
    }

    /// Number of registered connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Check whether a connection id is registered.
    #[must_use]
    pub fn is_registered(&self, id: &str) -> bool {
        self.shared.registry.contains(id)
    }

    /// Close every connection and stop the loop.
    ///
    /// Returns the number of connections that were closed. In-flight
    /// handler tasks are not awaited.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Stopped`] if the hub was already stopped.
    pub async fn shutdown(&self) -> Result<usize, HubError> {
        let (ack, done) = oneshot::channel();
        self.shared
            .commands
            .send(Command::Shutdown { ack })
            .await
            .map_err(|_| HubError::Stopped)?;
        done.await.map_err(|_| HubError::Stopped)
    }
}

impl HubTask {
    /// Run the loop until shutdown or until every [`Hub`] handle is gone.
    pub async fn run(mut self) {
        debug!("Hub loop started");

        while let Some(command) = self.commands.recv().await {
            match command {
                Command::Register { connection, ack } => {
                    self.register(connection);
                    ack.send(()).ok();
                }
                Command::Unregister { id, ack } => {
                    ack.send(self.unregister(&id)).ok();
                }
                Command::Broadcast(encoded) => {
                    let delivered = self.registry.deliver(&encoded, |_| true);
                    trace!(recipients = delivered, "Broadcast delivered");
                }
                Command::Shutdown { ack } => {
                    let closed = self.close_all();
                    info!(connections = closed, "Hub shut down");
                    ack.send(closed).ok();
                    return;
                }
            }
        }

        let closed = self.close_all();
        debug!(connections = closed, "Hub loop stopped, all handles dropped");
    }

    fn register(&self, connection: Arc<Connection>) {
        let id = connection.id().clone();
        if !self.registry.insert(Arc::clone(&connection)) {
            warn!(connection = %id, "Connection id already registered");
            return;
        }

        match encode(&Event::connected(id.as_str()), self.encoding) {
            Ok(greeting) => {
                if connection.try_enqueue(Arc::new(greeting)).is_err() {
                    warn!(connection = %id, "Could not queue connected event");
                }
            }
            Err(e) => warn!(connection = %id, error = %e, "Failed to encode connected event"),
        }

        debug!(connection = %id, total = self.registry.len(), "Registered connection");
    }

    fn unregister(&self, id: &ConnectionId) -> bool {
        match self.registry.remove(id.as_str()) {
            Some(connection) => {
                connection.close();
                debug!(connection = %id, total = self.registry.len(), "Unregistered connection");
                true
            }
            None => false,
        }
    }

    fn close_all(&self) -> usize {
        let connections = self.registry.drain();
        for connection in &connections {
            connection.close();
        }
        connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_protocol::{codec, Frame};

    fn decode(encoded: &Encoded) -> Event {
        codec::decode(&encoded.to_frame()).unwrap()
    }

    #[tokio::test]
    async fn test_register_sends_connected() {
        let hub = Hub::spawn(HubConfig::default());
        let (conn, mut rx) = Connection::new(8);

        hub.register(Arc::clone(&conn)).await.unwrap();

        assert_eq!(hub.connection_count(), 1);
        let greeting = decode(&rx.recv().await.unwrap());
        assert_eq!(greeting.name, "connected");
        assert_eq!(greeting.data["connectionId"], conn.id().as_str());
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let hub = Hub::spawn(HubConfig::default());
        let (conn, mut rx) = Connection::new(8);
        hub.register(Arc::clone(&conn)).await.unwrap();

        assert!(hub.unregister(conn.id()).await);
        assert!(!hub.unregister(conn.id()).await);
        assert!(conn.is_closed());
        assert_eq!(hub.connection_count(), 0);

        // Greeting, then end of queue.
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_broadcast_after_register_is_received() {
        let hub = Hub::spawn(HubConfig::default());
        let (conn, mut rx) = Connection::new(8);
        hub.register(Arc::clone(&conn)).await.unwrap();

        assert!(hub.emit_to_all("notice", "hello"));

        rx.recv().await.unwrap();
        let event = decode(&rx.recv().await.unwrap());
        assert_eq!(event, Event::new("notice", "hello"));
    }

    #[tokio::test]
    async fn test_no_broadcast_after_unregister() {
        let hub = Hub::spawn(HubConfig::default());
        let (conn, mut rx) = Connection::new(8);
        hub.register(Arc::clone(&conn)).await.unwrap();
        hub.unregister(conn.id()).await;

        hub.emit_to_all("late", serde_json::Value::Null);

        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything() {
        let hub = Hub::spawn(HubConfig::default());
        let (a, _ra) = Connection::new(8);
        let (b, _rb) = Connection::new(8);
        hub.register(Arc::clone(&a)).await.unwrap();
        hub.register(Arc::clone(&b)).await.unwrap();

        assert_eq!(hub.shutdown().await.unwrap(), 2);
        assert!(a.is_closed() && b.is_closed());
        assert_eq!(hub.connection_count(), 0);

        // Give the loop a moment to drop its receiver.
        tokio::task::yield_now().await;
        let (c, _rc) = Connection::new(8);
        assert!(matches!(hub.register(c).await, Err(HubError::Stopped)));
        assert!(!hub.emit_to_all("after", 1));
    }

    #[tokio::test]
    async fn test_full_command_queue_drops_broadcast() {
        let config = HubConfig {
            command_capacity: 1,
            ..HubConfig::default()
        };
        // Loop not started, so nothing drains the queue.
        let (hub, _task) = Hub::new(config);

        assert!(hub.emit_to_all("first", 1));
        assert!(!hub.emit_to_all("second", 2));
    }

    #[tokio::test]
    async fn test_msgpack_encoding() {
        let hub = Hub::spawn(HubConfig {
            encoding: Encoding::Msgpack,
            ..HubConfig::default()
        });
        let (conn, mut rx) = Connection::new(8);
        hub.register(conn).await.unwrap();

        let greeting = rx.recv().await.unwrap();
        assert!(matches!(greeting.to_frame(), Frame::Binary(_)));
        assert_eq!(decode(&greeting).name, "connected");
    }

    async fn noop(_ctx: EventContext, _data: serde_json::Value) -> anyhow::Result<()> {
        Ok(())
    }

    #[tokio::test]
    async fn test_handled_events() {
        let hub = Hub::spawn(HubConfig::default());
        assert!(hub.handled_events().is_empty());

        hub.on_event("typing", noop);
        hub.on_event("chat", noop);
        hub.on_event("chat", noop);

        assert_eq!(hub.handled_events(), vec!["chat".to_string(), "typing".to_string()]);
    }
}
