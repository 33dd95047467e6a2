//! WebSocket transport implementation.
//!
//! This module adapts `tokio-tungstenite` streams to [`FrameSocket`] and
//! provides a standalone listener for running the hub without an HTTP
//! framework in front of it.

use futures_util::{future, SinkExt, StreamExt};
use herald_protocol::Frame;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    accept_async_with_config,
    tungstenite::{protocol::WebSocketConfig as WsProtocolConfig, Error as WsError, Message},
    WebSocketStream,
};
use tracing::{debug, info, warn};

use crate::traits::{FrameSocket, TransportError};

/// WebSocket transport configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum message size in bytes.
    pub max_message_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            max_message_size: 64 * 1024, // 64 KB
        }
    }
}

/// Standalone WebSocket listener.
pub struct WebSocketListener {
    listener: TcpListener,
    config: WebSocketConfig,
}

impl WebSocketListener {
    /// Bind a new listener.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn bind(config: WebSocketConfig) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(config.bind_addr).await?;

        info!("WebSocket transport listening on {}", config.bind_addr);

        Ok(Self { listener, config })
    }

    /// Get the local address this listener is bound to.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }

    /// Accept the next connection and complete the WebSocket handshake.
    ///
    /// # Errors
    ///
    /// Returns an error if accepting or the handshake fails. The listener
    /// stays usable either way.
    pub async fn accept(&self) -> Result<(impl FrameSocket, SocketAddr), TransportError> {
        let (stream, addr) = self.listener.accept().await?;

        debug!("Accepted TCP connection from {}", addr);

        let ws_stream = handshake(stream, self.config.max_message_size).await?;

        debug!("WebSocket handshake completed with {}", addr);

        Ok((adapt(ws_stream), addr))
    }
}

async fn handshake(
    stream: TcpStream,
    max_message_size: usize,
) -> Result<WebSocketStream<TcpStream>, TransportError> {
    let mut config = WsProtocolConfig::default();
    config.max_message_size = Some(max_message_size);
    config.max_frame_size = Some(max_message_size);

    accept_async_with_config(stream, Some(config))
        .await
        .map_err(|e| {
            warn!("WebSocket handshake failed: {}", e);
            TransportError::Handshake(e.to_string())
        })
}

/// Adapt a tungstenite stream (server or client side) into a frame socket.
pub fn adapt<S>(stream: WebSocketStream<S>) -> impl FrameSocket
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    stream
        .filter_map(|message| future::ready(from_message(message).transpose()))
        .sink_map_err(|e: WsError| TransportError::SendFailed(e.to_string()))
        .with(|frame: Frame| future::ready(Ok::<_, TransportError>(into_message(frame))))
}

fn from_message(message: Result<Message, WsError>) -> Result<Option<Frame>, TransportError> {
    match message {
        Ok(Message::Text(text)) => Ok(Some(Frame::Text(text))),
        Ok(Message::Binary(data)) => Ok(Some(Frame::Binary(data))),
        Ok(Message::Ping(data)) => Ok(Some(Frame::Ping(data))),
        Ok(Message::Pong(data)) => Ok(Some(Frame::Pong(data))),
        Ok(Message::Close(_)) => Ok(Some(Frame::Close)),
        // Raw frames only appear on the write path.
        Ok(Message::Frame(_)) => Ok(None),
        Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => {
            Err(TransportError::ConnectionClosed)
        }
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
