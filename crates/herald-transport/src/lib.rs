//! # herald-transport
//!
//! Transport abstraction layer for the Herald realtime hub.
//!
//! Every connection is driven through a [`FrameSocket`]: a stream of inbound
//! [`Frame`](herald_protocol::Frame)s paired with a sink for outbound ones.
//! Adapters are provided for:
//!
//! - **axum** - sockets upgraded by an axum handler
//! - **WebSocket** - raw `tokio-tungstenite` streams and a standalone listener
//! - **Memory** - in-process socket pairs for tests and benchmarks
//!
//! ```rust,ignore
//! use herald_transport::websocket::{WebSocketConfig, WebSocketListener};
//!
//! let listener = WebSocketListener::bind(WebSocketConfig::default()).await?;
//! let (socket, addr) = listener.accept().await?;
//! tokio::spawn(herald_core::serve(hub.clone(), socket));
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "axum")]
pub mod axum;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use memory::{pair, MemorySocket};
pub use traits::{FrameSocket, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConfig, WebSocketListener};
