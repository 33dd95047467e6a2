//! Hub instrumentation.
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! embedding process installs a recorder.

use metrics::{counter, gauge};

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "herald_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "herald_connections_active";
    pub const MESSAGES_TOTAL: &str = "herald_messages_total";
    pub const MESSAGES_BYTES: &str = "herald_messages_bytes";
    pub const BROADCASTS_DROPPED: &str = "herald_broadcasts_dropped_total";
    pub const EVICTIONS_TOTAL: &str = "herald_evictions_total";
    pub const HANDLER_FAILURES: &str = "herald_handler_failures_total";
    pub const ERRORS_TOTAL: &str = "herald_errors_total";
}

/// Message direction label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Register metric descriptions with the installed recorder.
pub fn describe() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since hub start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of registered connections"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of frames processed");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of frames processed");
    metrics::describe_counter!(
        names::BROADCASTS_DROPPED,
        "Broadcasts dropped because the hub command queue was full"
    );
    metrics::describe_counter!(
        names::EVICTIONS_TOTAL,
        "Connections evicted because their outbound queue was full"
    );
    metrics::describe_counter!(
        names::HANDLER_FAILURES,
        "Event handler invocations that returned an error or panicked"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");
}

/// Record a frame read from or written to a connection.
pub fn record_message(bytes: usize, direction: Direction) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction.as_str()).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => direction.as_str()).increment(bytes as u64);
}

/// Record a broadcast that never reached the hub loop.
pub fn record_dropped_broadcast() {
    counter!(names::BROADCASTS_DROPPED).increment(1);
}

/// Record a slow-consumer eviction.
pub fn record_eviction() {
    counter!(names::EVICTIONS_TOTAL).increment(1);
}

/// Record a failed handler invocation.
pub fn record_handler_failure(event: &str, panicked: bool) {
    let outcome = if panicked { "panic" } else { "error" };
    counter!(names::HANDLER_FAILURES, "event" => event.to_string(), "outcome" => outcome)
        .increment(1);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Tracks a registered connection; the active gauge drops with the guard.
#[derive(Debug)]
pub struct ConnectionGuard(());

impl ConnectionGuard {
    /// Create a new guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        counter!(names::CONNECTIONS_TOTAL).increment(1);
        gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
        Self(())
    }
}

impl Default for ConnectionGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
    }
}
