//! Frame types for the Herald protocol.
//!
//! A [`Frame`] is one transport-level message. It mirrors the WebSocket
//! message kinds so the hub can be driven by any duplex transport without
//! depending on a particular WebSocket implementation.

use bytes::Bytes;
use std::sync::Arc;

/// A transport frame.
///
/// Data frames carry an encoded [`Event`](crate::Event); control frames
/// carry transport liveness and shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 data frame (JSON envelope).
    Text(String),
    /// Binary data frame (MessagePack envelope).
    Binary(Vec<u8>),
    /// Protocol-level liveness check.
    Ping(Vec<u8>),
    /// Reply to a [`Frame::Ping`].
    Pong(Vec<u8>),
    /// Orderly close.
    Close,
}

impl Frame {
    /// Create a new Text frame.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Frame::Text(text.into())
    }

    /// Create a new Ping frame with an empty payload.
    #[must_use]
    pub fn ping() -> Self {
        Frame::Ping(Vec::new())
    }

    /// Whether this frame carries an event envelope.
    #[must_use]
    pub fn is_data(&self) -> bool {
        matches!(self, Frame::Text(_) | Frame::Binary(_))
    }

    /// Payload length in bytes (0 for `Close`).
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(s) => s.len(),
            Frame::Binary(b) | Frame::Ping(b) | Frame::Pong(b) => b.len(),
            Frame::Close => 0,
        }
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An encoded outbound event, shared between every recipient of one emit.
///
/// Encoding happens once per emit; each connection's writer only converts
/// the shared bytes into an owned [`Frame`] for its transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encoded {
    /// JSON text.
    Text(Arc<str>),
    /// MessagePack bytes.
    Binary(Bytes),
}

impl Encoded {
    /// Build the transport frame for this payload.
    #[must_use]
    pub fn to_frame(&self) -> Frame {
        match self {
            Encoded::Text(text) => Frame::Text(text.to_string()),
            Encoded::Binary(bytes) => Frame::Binary(bytes.to_vec()),
        }
    }

    /// Encoded size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Encoded::Text(text) => text.len(),
            Encoded::Binary(bytes) => bytes.len(),
        }
    }

    /// Whether the encoded payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
