//! Metrics collection and exposition.
//!
//! # Metrics
//! - `tunnel_requests_total` (counter): terminated requests by status
//! - `tunnel_request_duration_seconds` (histogram): end-to-end latency
//! - `tunnel_pooled_connections` (gauge): live destination connections
//! - `tunnel_evictions_total` (counter): pooled connections dropped, by reason
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Prometheus exporter is opt-in via config

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Start the Prometheus scrape endpoint. Must run inside a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record one terminated request.
pub fn record_request(status: u16, start: Instant) {
    metrics::counter!("tunnel_requests_total", "status" => status.to_string()).increment(1);
    metrics::histogram!("tunnel_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn set_pooled_connections(count: usize) {
    metrics::gauge!("tunnel_pooled_connections").set(count as f64);
}

pub fn record_eviction(reason: &'static str) {
    metrics::counter!("tunnel_evictions_total", "reason" => reason).increment(1);
}
