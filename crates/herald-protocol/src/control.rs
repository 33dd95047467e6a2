//! Reserved inbound events handled by the hub itself.
//!
//! Any inbound event whose name is listed here never reaches application
//! handlers.

use crate::codec::ProtocolError;
use crate::event::Event;
use serde_json::Value;

/// Application user identifier carried by `subscribe_user`.
pub type UserId = i64;

/// Reserved event names.
pub mod names {
    pub const PING: &str = "ping";
    pub const SUBSCRIBE_USER: &str = "subscribe_user";
    pub const JOIN_GROUP: &str = "join_group";
    pub const LEAVE_GROUP: &str = "leave_group";
}

/// Check whether an event name is reserved for control messages.
#[must_use]
pub fn is_reserved(name: &str) -> bool {
    matches!(
        name,
        names::PING | names::SUBSCRIBE_USER | names::JOIN_GROUP | names::LEAVE_GROUP
    )
}

/// A parsed control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    /// Application-level ping; answered with a single `pong`.
    Ping,
    /// Bind the connection to a user id (last write wins).
    SubscribeUser(UserId),
    /// Add the connection to a group.
    JoinGroup(String),
    /// Remove the connection from a group.
    LeaveGroup(String),
}

/// An inbound event after classification.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Reserved control message.
    Control(Control),
    /// Application event, forwarded to the dispatcher.
    Custom(Event),
}

impl Inbound {
    /// Classify a decoded event.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidControl`] if the name is reserved but
    /// the payload has the wrong shape.
    pub fn classify(event: Event) -> Result<Self, ProtocolError> {
        let control = match event.name.as_str() {
            names::PING => Control::Ping,
            names::SUBSCRIBE_USER => Control::SubscribeUser(user_id(&event.data).ok_or(
                ProtocolError::InvalidControl {
                    event: names::SUBSCRIBE_USER,
                    reason: "data must be a number",
                },
            )?),
            names::JOIN_GROUP => Control::JoinGroup(group_name(names::JOIN_GROUP, &event.data)?),
            names::LEAVE_GROUP => {
                Control::LeaveGroup(group_name(names::LEAVE_GROUP, &event.data)?)
            }
            _ => return Ok(Inbound::Custom(event)),
        };
        Ok(Inbound::Control(control))
    }
}

/// Numeric user ids arrive as JSON numbers; fractional values truncate.
fn user_id(data: &Value) -> Option<UserId> {
    data.as_i64().or_else(|| {
        data.as_f64()
            .filter(|f| f.is_finite() && f.abs() <= i64::MAX as f64)
            .map(|f| f.trunc() as i64)
    })
}

fn group_name(event: &'static str, data: &Value) -> Result<String, ProtocolError> {
    match data.as_str() {
        Some(name) if !name.is_empty() => Ok(name.to_string()),
        Some(_) => Err(ProtocolError::InvalidControl {
            event,
            reason: "group name cannot be empty",
        }),
        None => Err(ProtocolError::InvalidControl {
            event,
            reason: "data must be a string",
        }),
    }
}
