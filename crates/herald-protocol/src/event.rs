//! The `{event, data}` envelope exchanged with clients.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Outbound event sent to every connection right after registration.
pub const CONNECTED: &str = "connected";

/// Reply to an inbound `ping` event.
pub const PONG: &str = "pong";

/// A wire event.
///
/// Serialized as `{"event": <name>, "data": <payload>}`. A missing `data`
/// field decodes as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event name.
    #[serde(rename = "event")]
    pub name: String,
    /// Arbitrary payload.
    #[serde(default)]
    pub data: Value,
}

impl Event {
    /// Create a new event.
    #[must_use]
    pub fn new(name: impl Into<String>, data: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    /// Create an event without payload.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(name, Value::Null)
    }

    /// The greeting sent to a freshly registered connection.
    #[must_use]
    pub fn connected(connection_id: &str) -> Self {
        Self::new(CONNECTED, json!({ "connectionId": connection_id }))
    }

    /// The reply to a client `ping`.
    #[must_use]
    pub fn pong() -> Self {
        Self::new(PONG, PONG)
    }
}
