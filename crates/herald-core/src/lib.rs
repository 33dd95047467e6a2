//! # herald-core
//!
//! Connection registry, hub loop and event dispatch for the Herald realtime
//! hub.
//!
//! This crate provides the fan-out machinery:
//!
//! - **Connection** - identity and bounded outbound queue of one client
//! - **Registry** - the set of live connections
//! - **Hub** - serialized register/unregister/broadcast loop
//! - **Dispatcher** - inbound event name to handler callbacks
//! - **Publisher** - `emit_to_all`, `emit_to_user`, `emit_to_group`,
//!   `emit_to_connection`
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  register / unregister / broadcast  ┌─────────────┐
//! │   Session   │────────────────────────────────────▶│  Hub loop   │
//! └─────────────┘                                     └─────────────┘
//!        │ inbound events                                    │
//!        ▼                                                   ▼
//! ┌─────────────┐     ┌─────────────┐  targeted emits ┌─────────────┐
//! │ Dispatcher  │────▶│  Handlers   │────────────────▶│  Registry   │
//! └─────────────┘     └─────────────┘                 └─────────────┘
//!                                                            │
//!                                                            ▼
//!                                                    outbound queues
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use herald_core::{Hub, HubConfig};
//!
//! # async fn run() {
//! let hub = Hub::spawn(HubConfig::default());
//!
//! hub.on_event("chat_message", |ctx: herald_core::EventContext, data: serde_json::Value| async move {
//!     ctx.hub.emit_to_all("new_chat_message", data);
//!     anyhow::Ok(())
//! });
//!
//! hub.emit_to_group("admins", "notice", serde_json::json!({"m": "x"}));
//! # }
//! ```

pub mod connection;
pub mod dispatcher;
pub mod hub;
pub mod metrics;
mod publisher;
pub mod registry;
pub mod session;

pub use connection::{Connection, ConnectionId, ConnectionInfo, EnqueueError};
pub use dispatcher::{Dispatcher, EventContext, EventHandler};
pub use hub::{Hub, HubConfig, HubError, HubTask};
pub use registry::Registry;
pub use session::serve;
