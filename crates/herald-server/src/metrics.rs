//! Metrics export for the Herald server.
//!
//! The hub records through the `metrics` facade; this module describes the
//! server-level metrics and installs the Prometheus exporter.

use anyhow::{Context, Result};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_REJECTED: &str = "herald_connections_rejected_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    herald_core::metrics::describe();
    metrics::describe_counter!(
        names::CONNECTIONS_REJECTED,
        "WebSocket upgrades refused because the connection limit was reached"
    );

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record an upgrade refused at the connection limit.
pub fn record_rejected_connection() {
    counter!(names::CONNECTIONS_REJECTED).increment(1);
}
