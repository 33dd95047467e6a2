//! # herald-server
//!
//! HTTP front end for the Herald hub: WebSocket endpoints, health and
//! status routes, layered configuration, Prometheus metrics and the
//! built-in relay handlers.

pub mod config;
pub mod handlers;
pub mod metrics;
pub mod relay;

pub use config::Config;
pub use handlers::{app, run_server, serve, spawn_hub, AppState};
