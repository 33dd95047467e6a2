//! Transport abstraction for Herald.
//!
//! A transport is anything that yields inbound [`Frame`]s as a stream and
//! accepts outbound frames as a sink. The hub drives every connection through
//! this interface, so the WebSocket flavour (axum, tungstenite, in-memory) is
//! chosen at the edge.

use futures_util::{Sink, Stream};
use herald_protocol::Frame;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// An operation did not complete in time.
    #[error("Connection timed out")]
    Timeout,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// WebSocket handshake failed.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A duplex frame socket.
///
/// Reading yields `Ok(frame)` until the peer goes away (`None`) or the
/// transport fails (`Err`). Writing accepts frames in order.
pub trait FrameSocket:
    Stream<Item = Result<Frame, TransportError>> + Sink<Frame, Error = TransportError> + Send + 'static
{
}

impl<T> FrameSocket for T where
    T: Stream<Item = Result<Frame, TransportError>>
        + Sink<Frame, Error = TransportError>
        + Send
        + 'static
{
}
