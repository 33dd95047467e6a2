//! Targeted publishing.
//!
//! Every emit encodes the event once and shares the bytes between
//! recipients. None of these calls wait: a recipient whose outbound queue
//! is full is evicted instead of slowing the publisher down.

use crate::hub::Hub;
use herald_protocol::{Event, UserId};
use serde_json::Value;
use tracing::{trace, warn};

impl Hub {
    /// Send an event to every registered connection.
    ///
    /// The broadcast is applied by the hub loop, in order with registrations.
    /// Returns `false` if it was dropped because the command queue is full or
    /// the hub has stopped.
    pub fn emit_to_all(&self, name: &str, data: impl Into<Value>) -> bool {
        match self.encode(&Event::new(name, data)) {
            Ok(encoded) => self.try_broadcast(encoded),
            Err(e) => {
                warn!(event = %name, error = %e, "Failed to encode broadcast");
                false
            }
        }
    }

    /// Send an event to every connection subscribed to `user_id`.
    ///
    /// Returns the number of connections it was queued for.
    pub fn emit_to_user(&self, user_id: UserId, name: &str, data: impl Into<Value>) -> usize {
        self.emit_where(name, data.into(), |c| c.user_id() == Some(user_id))
    }

    /// Send an event to every member of `group`.
    ///
    /// Returns the number of connections it was queued for.
    pub fn emit_to_group(&self, group: &str, name: &str, data: impl Into<Value>) -> usize {
        self.emit_where(name, data.into(), |c| c.in_group(group))
    }

    /// Send an event to a single connection. Unknown ids are ignored.
    ///
    /// Returns whether the event was queued.
    pub fn emit_to_connection(&self, id: &str, name: &str, data: impl Into<Value>) -> bool {
        let encoded = match self.encode(&Event::new(name, data)) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(event = %name, connection = %id, error = %e, "Failed to encode event");
                return false;
            }
        };
        self.registry().deliver_to(id, &encoded)
    }

    fn emit_where<F>(&self, name: &str, data: Value, filter: F) -> usize
    where
        F: Fn(&crate::Connection) -> bool,
    {
        let encoded = match self.encode(&Event::new(name, data)) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(event = %name, error = %e, "Failed to encode event");
                return 0;
            }
        };
        let delivered = self.registry().deliver(&encoded, filter);
        trace!(event = %name, recipients = delivered, "Targeted emit");
        delivered
    }
}
