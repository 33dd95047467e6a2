//! HTTP and WebSocket handlers for the Herald server.
//!
//! Every configured WebSocket path feeds the same hub. The plain HTTP
//! routes report service and connection state.

use crate::config::Config;
use crate::metrics;
use crate::relay;
use anyhow::{Context, Result};
use axum::{
    extract::{ws::WebSocketUpgrade, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use herald_core::Hub;
use serde_json::{json, Map, Value};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Shared server state.
#[derive(Clone)]
pub struct AppState {
    /// The hub every socket is attached to.
    pub hub: Hub,
    /// Server configuration.
    pub config: Arc<Config>,
}

impl AppState {
    /// Create new app state around a running hub.
    #[must_use]
    pub fn new(hub: Hub, config: Config) -> Self {
        Self {
            hub,
            config: Arc::new(config),
        }
    }
}

/// Start a hub for this configuration, with relay handlers if enabled.
#[must_use]
pub fn spawn_hub(config: &Config) -> Hub {
    let hub = Hub::spawn(config.to_hub_config());
    if config.relay.enabled {
        relay::install(&hub);
    }
    hub
}

/// Build the application router.
pub fn app(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/status", get(status_handler));

    for path in &state.config.transport.paths {
        router = router.route(path, get(ws_handler));
    }

    router.with_state(state)
}

/// Run the HTTP/WebSocket server until a shutdown signal arrives.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {:#}", e);
        }
    }
    // Descriptions only reach a recorder that is already installed.
    metrics::init_metrics();

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Herald server listening on {}", addr);
    for path in &config.transport.paths {
        info!("WebSocket endpoint: ws://{}{}", addr, path);
    }

    let hub = spawn_hub(&config);
    serve(listener, AppState::new(hub, config), shutdown_signal()).await
}

/// Serve on an already-bound listener until `signal` resolves, then close
/// every connection.
///
/// # Errors
///
/// Returns an error if the HTTP server fails.
pub async fn serve<F>(listener: TcpListener, state: AppState, signal: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let hub = state.hub.clone();
    let router = app(state);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            signal.await;
            info!("Shutdown signal received");
            match hub.shutdown().await {
                Ok(closed) => info!(connections = closed, "Closed all connections"),
                Err(e) => warn!(error = %e, "Hub already stopped"),
            }
        })
        .await
        .context("Server error")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

/// Service description.
async fn index_handler(State(state): State<AppState>) -> impl IntoResponse {
    let mut endpoints = endpoint_map(&state.config);
    endpoints.insert("status".into(), Value::from("/status"));
    endpoints.insert("health".into(), Value::from("/health"));

    Json(json!({
        "service": "Herald WebSocket Server",
        "status": "running",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": endpoints,
    }))
}

/// Health check handler.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let status = if state.hub.is_running() {
        "healthy"
    } else {
        "stopping"
    };

    Json(json!({
        "status": status,
        "version": env!("CARGO_PKG_VERSION"),
        "socket_clients": state.hub.connection_count(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Connected clients, keyed by connection id.
async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let clients = state.hub.connected_clients();
    let count = clients.len();
    let clients: Map<String, Value> = clients
        .into_iter()
        .map(|info| {
            let id = info.id.clone();
            (id, serde_json::to_value(info).unwrap_or(Value::Null))
        })
        .collect();

    Json(json!({
        "connected_clients": count,
        "clients": clients,
        "events": state.hub.handled_events(),
        "endpoints": endpoint_map(&state.config),
    }))
}

/// WebSocket upgrade handler.
///
/// The connection limit is soft: it is checked against the registered count
/// before upgrading, so upgrades racing each other can briefly exceed
/// `limits.max_connections`.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let active = state.hub.connection_count();
    if active >= state.config.limits.max_connections {
        warn!(
            active,
            limit = state.config.limits.max_connections,
            "Connection limit reached, refusing upgrade"
        );
        metrics::record_rejected_connection();
        return (StatusCode::SERVICE_UNAVAILABLE, "Connection limit reached").into_response();
    }

    let hub = state.hub.clone();
    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| herald_core::serve(hub, herald_transport::axum::adapt(socket)))
}

fn endpoint_map(config: &Config) -> Map<String, Value> {
    config
        .transport
        .paths
        .iter()
        .map(|path| {
            let name = path.trim_start_matches('/');
            let name = if name.is_empty() { "root" } else { name };
            (name.to_string(), Value::from(path.as_str()))
        })
        .collect()
}
