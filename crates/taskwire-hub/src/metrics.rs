//! Metrics collection and export for Taskwire.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format. Without an installed recorder every call is a no-op.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use taskwire_core::ConnectionState;
use tracing::info;

/// Metric names.
pub mod names {
    pub const FRAMES_TOTAL: &str = "taskwire_frames_total";
    pub const CONNECT_ATTEMPTS_TOTAL: &str = "taskwire_connect_attempts_total";
    pub const CONNECTION_STATE: &str = "taskwire_connection_state";
    pub const COMMANDS_REJECTED_TOTAL: &str = "taskwire_commands_rejected_total";
    pub const FRAMES_DROPPED_TOTAL: &str = "taskwire_frames_dropped_total";
    pub const NOTIFICATIONS_TOTAL: &str = "taskwire_notifications_total";
    pub const POLL_ERRORS_TOTAL: &str = "taskwire_poll_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::FRAMES_TOTAL,
        "Frames exchanged with the server, by direction"
    );
    metrics::describe_counter!(
        names::CONNECT_ATTEMPTS_TOTAL,
        "Connection attempts, by outcome"
    );
    metrics::describe_gauge!(
        names::CONNECTION_STATE,
        "Current connection state (0 disconnected, 1 connecting, 2 connected, 3 reconnecting, 4 failed)"
    );
    metrics::describe_counter!(
        names::COMMANDS_REJECTED_TOTAL,
        "Outbound commands rejected because the hub was not connected"
    );
    metrics::describe_counter!(
        names::FRAMES_DROPPED_TOTAL,
        "Queued outbound frames dropped when a connection ended"
    );
    metrics::describe_counter!(
        names::NOTIFICATIONS_TOTAL,
        "Notifications received, by source"
    );
    metrics::describe_counter!(names::POLL_ERRORS_TOTAL, "Failed notification polls");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics endpoint.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a frame.
pub fn record_frame(direction: &'static str) {
    counter!(names::FRAMES_TOTAL, "direction" => direction).increment(1);
}

/// Record the outcome of a connection attempt.
pub fn record_connect_attempt(outcome: &'static str) {
    counter!(names::CONNECT_ATTEMPTS_TOTAL, "outcome" => outcome).increment(1);
}

/// Update the connection state gauge.
pub fn set_connection_state(state: ConnectionState) {
    gauge!(names::CONNECTION_STATE).set(f64::from(state.code()));
}

/// Record a command rejected while not connected.
pub fn record_command_rejected() {
    counter!(names::COMMANDS_REJECTED_TOTAL).increment(1);
}

/// Record outbound frames dropped with their connection.
pub fn record_frames_dropped(count: usize) {
    counter!(names::FRAMES_DROPPED_TOTAL).increment(count as u64);
}

/// Record a notification by source (`push` or `poll`).
pub fn record_notifications(source: &'static str, count: usize) {
    counter!(names::NOTIFICATIONS_TOTAL, "source" => source).increment(count as u64);
}

/// Record a failed poll.
pub fn record_poll_error() {
    counter!(names::POLL_ERRORS_TOTAL).increment(1);
}
