//! Per-connection state.
//!
//! A [`Connection`] is the hub-side handle for one client stream: its id,
//! the identity the client claimed over control messages, and the sending
//! half of its bounded outbound queue. The receiving half belongs to the
//! connection's writer task.

use herald_protocol::{Encoded, UserId};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::borrow::Borrow;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Default outbound queue capacity per connection.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Process-unique connection identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Arc<str>);

impl ConnectionId {
    /// Generate a fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Arc::from(uuid::Uuid::new_v4().to_string()))
    }

    /// Get the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ConnectionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

/// Why an outbound event was not queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EnqueueError {
    /// The queue is at capacity; the consumer is too slow.
    #[error("Outbound queue full")]
    Full,
    /// The connection has been torn down.
    #[error("Connection closed")]
    Closed,
}

#[derive(Debug, Default)]
struct Identity {
    user_id: Option<UserId>,
    groups: HashSet<String>,
}

/// A registered client connection.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    outbound: Mutex<Option<mpsc::Sender<Arc<Encoded>>>>,
    closed: AtomicBool,
    identity: RwLock<Identity>,
}

impl Connection {
    /// Create a connection with a fresh id and an outbound queue of the
    /// given capacity.
    ///
    /// Returns the connection and the receiving half of its queue.
    #[must_use]
    pub fn new(capacity: usize) -> (Arc<Self>, mpsc::Receiver<Arc<Encoded>>) {
        Self::with_id(ConnectionId::generate(), capacity)
    }

    /// Create a connection with a caller-chosen id.
    #[must_use]
    pub fn with_id(
        id: ConnectionId,
        capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Arc<Encoded>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let connection = Arc::new(Self {
            id,
            outbound: Mutex::new(Some(tx)),
            closed: AtomicBool::new(false),
            identity: RwLock::new(Identity::default()),
        });
        (connection, rx)
    }

    /// Get the connection id.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Queue an encoded event without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`EnqueueError::Full`] if the queue is at capacity and
    /// [`EnqueueError::Closed`] once the connection is torn down.
    pub fn try_enqueue(&self, encoded: Arc<Encoded>) -> Result<(), EnqueueError> {
        let outbound = self.outbound.lock();
        let Some(tx) = outbound.as_ref() else {
            return Err(EnqueueError::Closed);
        };
        tx.try_send(encoded).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Close the outbound queue.
    ///
    /// Items already queued are still delivered; the writer stops after the
    /// last one. Returns `true` only for the call that actually closed it.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.outbound.lock().take();
        true
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// The user id bound by `subscribe_user`, if any.
    #[must_use]
    pub fn user_id(&self) -> Option<UserId> {
        self.identity.read().user_id
    }

    /// Current group memberships, sorted.
    #[must_use]
    pub fn groups(&self) -> Vec<String> {
        let mut groups: Vec<String> = self.identity.read().groups.iter().cloned().collect();
        groups.sort();
        groups
    }

    /// Check group membership.
    #[must_use]
    pub fn in_group(&self, group: &str) -> bool {
        self.identity.read().groups.contains(group)
    }

    pub(crate) fn set_user_id(&self, user_id: UserId) {
        self.identity.write().user_id = Some(user_id);
    }

    /// Returns `false` if already a member.
    pub(crate) fn join_group(&self, group: &str) -> bool {
        self.identity.write().groups.insert(group.to_string())
    }

    /// Returns `false` if not a member.
    pub(crate) fn leave_group(&self, group: &str) -> bool {
        self.identity.write().groups.remove(group)
    }

    /// Snapshot for introspection.
    #[must_use]
    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id.to_string(),
            user_id: self.user_id(),
            groups: self.groups(),
        }
    }
}

/// Public view of a connection, as reported by `connected_clients`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    /// Connection id.
    pub id: String,
    /// Subscribed user id.
    pub user_id: Option<UserId>,
    /// Group memberships, sorted.
    pub groups: Vec<String>,
}
