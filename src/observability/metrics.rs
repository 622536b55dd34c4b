//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define hub metrics (connections, requests, push traffic, liveness)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `hub_connections_total` (counter): accepted connections by `secure`
//! - `hub_connections_active` (gauge): connections currently running
//! - `hub_connections_closed_total` (counter): closed connections by `reason`
//! - `hub_http_requests_total` (counter): responses by `status`
//! - `hub_push_messages_total` (counter): WebSocket messages by `direction`
//! - `hub_liveness_probes_total` (counter): pings sent to silent clients
//! - `hub_timeouts_total` (counter): liveness timeouts by `mode`
//!
//! # Design Decisions
//! - Low-overhead metric updates (atomic operations)
//! - Without an installed recorder every call is a no-op

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Start the Prometheus scrape endpoint on `addr`. Needs a running tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    describe();
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

fn describe() {
    ::metrics::describe_counter!("hub_connections_total", "Accepted client connections");
    ::metrics::describe_gauge!("hub_connections_active", "Client connections currently open");
    ::metrics::describe_counter!("hub_connections_closed_total", "Closed client connections by reason");
    ::metrics::describe_counter!("hub_http_requests_total", "HTTP responses by status code");
    ::metrics::describe_counter!("hub_push_messages_total", "WebSocket messages by direction");
    ::metrics::describe_counter!("hub_liveness_probes_total", "Liveness pings sent to idle clients");
    ::metrics::describe_counter!("hub_timeouts_total", "Liveness timeouts by protocol mode");
}

pub fn record_connection_opened(secure: bool) {
    ::metrics::counter!("hub_connections_total", "secure" => if secure { "true" } else { "false" })
        .increment(1);
    ::metrics::gauge!("hub_connections_active").increment(1.0);
}

pub fn record_connection_closed(reason: &'static str) {
    ::metrics::counter!("hub_connections_closed_total", "reason" => reason).increment(1);
    ::metrics::gauge!("hub_connections_active").decrement(1.0);
}

pub fn record_http_request(status: u16) {
    ::metrics::counter!("hub_http_requests_total", "status" => status.to_string()).increment(1);
}

pub fn record_push_message(direction: &'static str) {
    ::metrics::counter!("hub_push_messages_total", "direction" => direction).increment(1);
}

pub fn record_liveness_probe() {
    ::metrics::counter!("hub_liveness_probes_total").increment(1);
}

pub fn record_timeout(mode: &'static str) {
    ::metrics::counter!("hub_timeouts_total", "mode" => mode).increment(1);
}
