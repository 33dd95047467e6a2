//! Adapter for WebSockets upgraded through axum.

use ::axum::extract::ws::{Message, WebSocket};
use futures_util::{future, SinkExt, StreamExt};
use herald_protocol::Frame;

use crate::traits::{FrameSocket, TransportError};

/// Adapt an upgraded axum socket into a frame socket.
pub fn adapt(socket: WebSocket) -> impl FrameSocket {
    socket
        .map(from_message)
        .sink_map_err(|e: ::axum::Error| TransportError::SendFailed(e.to_string()))
        .with(|frame: Frame| future::ready(Ok::<_, TransportError>(into_message(frame))))
}

fn from_message(message: Result<Message, ::axum::Error>) -> Result<Frame, TransportError> {
    match message {
        Ok(Message::Text(text)) => Ok(Frame::Text(text)),
        Ok(Message::Binary(data)) => Ok(Frame::Binary(data)),
        Ok(Message::Ping(data)) => Ok(Frame::Ping(data)),
        Ok(Message::Pong(data)) => Ok(Frame::Pong(data)),
        Ok(Message::Close(_)) => Ok(Frame::Close),
        Err(e) => Err(TransportError::ReceiveFailed(e.to_string())),
    }
}

fn into_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text),
        Frame::Binary(data) => Message::Binary(data),
        Frame::Ping(data) => Message::Ping(data),
        Frame::Pong(data) => Message::Pong(data),
        Frame::Close => Message::Close(None),
    }
}
