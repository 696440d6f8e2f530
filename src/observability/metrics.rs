//! Metrics collection and exposition.
//!
//! # Metrics
//! - `dynapi_requests_total` (counter): dispatched requests by method, status, route
//! - `dynapi_request_duration_seconds` (histogram): dispatch latency
//! - `dynapi_reloads_total` (counter): reload cycles by outcome
//! - `dynapi_reload_duration_seconds` (histogram): reload cycle latency
//! - `dynapi_routes_active` (gauge): entries in the installed table
//! - `dynapi_route_synthesis_failures_total` (counter): modules skipped
//! - `dynapi_schema_fallbacks_total` (counter): schemas degraded to no-op
//! - `dynapi_change_events_total` (counter): feed events by kind
//! - `dynapi_feed_reconnects_total` (counter): change feed (re)connections
//! - `dynapi_teardown_failures_total` (counter): failed collection drops
//!
//! Without an installed recorder every call is a no-op.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

/// Install the Prometheus exporter on `addr`. Must run inside a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, route: &str, start: Instant) {
    counter!(
        "dynapi_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "route" => route.to_string()
    )
    .increment(1);
    histogram!("dynapi_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_reload(outcome: &'static str, routes: usize, start: Instant) {
    counter!("dynapi_reloads_total", "outcome" => outcome).increment(1);
    histogram!("dynapi_reload_duration_seconds").record(start.elapsed().as_secs_f64());
    if outcome == "installed" {
        gauge!("dynapi_routes_active").set(routes as f64);
    }
}

pub fn record_route_count(routes: usize) {
    gauge!("dynapi_routes_active").set(routes as f64);
}

pub fn record_synthesis_failures(count: usize) {
    if count > 0 {
        counter!("dynapi_route_synthesis_failures_total").increment(count as u64);
    }
}

pub fn record_schema_fallback() {
    counter!("dynapi_schema_fallbacks_total").increment(1);
}

pub fn record_change_event(kind: &'static str) {
    counter!("dynapi_change_events_total", "kind" => kind).increment(1);
}

pub fn record_feed_reconnect() {
    counter!("dynapi_feed_reconnects_total").increment(1);
}

pub fn record_teardown_failure() {
    counter!("dynapi_teardown_failures_total").increment(1);
}
