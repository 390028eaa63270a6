//! Metrics collection and exposition.
//!
//! # Metrics
//! - `server_requests_total` (counter): completed requests by method, status
//! - `server_request_duration_seconds` (histogram): time from dispatch to completion
//! - `server_active_connections` (gauge): open connections by protocol
//! - `server_handler_errors_total` (counter): requests that ended in a 500 incident
//! - `server_tls_reloads_total` (counter): identity reloads by outcome
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed
//! - Prometheus exporter is opt-in through `observability.metrics_enabled`

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::net::Protocol;

/// Install the Prometheus exporter on the given address.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a completed request.
pub fn record_request(method: &str, status: u16, start: Instant) {
    counter!(
        "server_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!(
        "server_request_duration_seconds",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .record(start.elapsed().as_secs_f64());
}

/// Record a request that ended in a handler failure.
pub fn record_handler_error() {
    counter!("server_handler_errors_total").increment(1);
}

/// A connection was accepted.
pub fn connection_opened(protocol: Protocol) {
    gauge!("server_active_connections", "protocol" => protocol.scheme()).increment(1.0);
}

/// A connection was closed.
pub fn connection_closed(protocol: Protocol) {
    gauge!("server_active_connections", "protocol" => protocol.scheme()).decrement(1.0);
}

/// A TLS identity reload was attempted.
pub fn record_tls_reload(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    counter!("server_tls_reloads_total", "outcome" => outcome).increment(1);
}
