//! Lightweight metrics helpers for the gateway (§10.5).
//!
//! Exposes a small set of convenience functions wrapping the `metrics` crate macros, plus a
//! `metrics-exporter-prometheus` recorder installed once at startup so `/metrics` has something
//! to render text from.
//!
//! Provided metrics (labels vary by family):
//! * `gatewire_requests_total` (counter, labeled by path/method/status/protocol)
//! * `gatewire_request_duration_seconds` (histogram)
//! * `gatewire_backend_requests_total` (counter)
//! * `gatewire_backend_request_duration_seconds` (histogram)
//! * `gatewire_backend_health_status` (gauge per endpoint)
//! * `gatewire_active_connections` (gauge)
//! * `gatewire_active_requests` (gauge)
//! * `gatewire_websocket_*` (WebSocket session/message/byte/close-code counters)
use std::{collections::HashMap, sync::Mutex};

use metrics::{
    Unit, counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::{Lazy, OnceCell};

pub const BACKEND_HEALTH_STATUS: &str = "gatewire_backend_health_status";
pub const REQUESTS_TOTAL: &str = "gatewire_requests_total";
pub const REQUEST_DURATION_SECONDS: &str = "gatewire_request_duration_seconds";
pub const BACKEND_REQUESTS_TOTAL: &str = "gatewire_backend_requests_total";
pub const BACKEND_REQUEST_DURATION_SECONDS: &str = "gatewire_backend_request_duration_seconds";
pub const ACTIVE_CONNECTIONS: &str = "gatewire_active_connections";
pub const ACTIVE_REQUESTS: &str = "gatewire_active_requests";
pub const WEBSOCKET_CONNECTIONS_TOTAL: &str = "gatewire_websocket_connections_total";
pub const WEBSOCKET_MESSAGES_TOTAL: &str = "gatewire_websocket_messages_total";
pub const WEBSOCKET_BYTES_TOTAL: &str = "gatewire_websocket_bytes_total";
pub const WEBSOCKET_CLOSE_CODES_TOTAL: &str = "gatewire_websocket_close_codes_total";

/// Storage for backend health status gauges, keyed by endpoint URL, for ad-hoc export.
pub static BACKEND_HEALTH_GAUGES: Lazy<Mutex<HashMap<String, f64>>> = Lazy::new(|| {
    describe_gauge!(
        BACKEND_HEALTH_STATUS,
        "Health status of individual backend endpoints (1 healthy, 0 unhealthy)."
    );
    describe_counter!(
        REQUESTS_TOTAL,
        Unit::Count,
        "Total number of requests processed by the gateway."
    );
    describe_histogram!(
        REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Latency of requests processed by the gateway."
    );
    describe_counter!(
        BACKEND_REQUESTS_TOTAL,
        Unit::Count,
        "Total number of requests forwarded to backend services."
    );
    describe_histogram!(
        BACKEND_REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Latency of requests forwarded to backend services."
    );
    describe_gauge!(
        ACTIVE_CONNECTIONS,
        "Number of currently active connections to the gateway."
    );
    describe_gauge!(
        ACTIVE_REQUESTS,
        "Number of currently active requests being processed."
    );
    describe_counter!(
        WEBSOCKET_CONNECTIONS_TOTAL,
        Unit::Count,
        "Total WebSocket connections established."
    );
    describe_counter!(
        WEBSOCKET_MESSAGES_TOTAL,
        Unit::Count,
        "Total WebSocket messages proxied, by direction and opcode."
    );
    describe_counter!(
        WEBSOCKET_BYTES_TOTAL,
        Unit::Bytes,
        "Total WebSocket payload bytes proxied, by direction."
    );
    describe_counter!(
        WEBSOCKET_CLOSE_CODES_TOTAL,
        Unit::Count,
        "WebSocket close frames observed, by code."
    );

    Mutex::new(HashMap::new())
});

/// Set (and record) the health status gauge for one backend endpoint.
pub fn set_backend_health_status(endpoint_url: &str, is_healthy: bool) {
    let value = if is_healthy { 1.0 } else { 0.0 };

    if let Ok(mut gauges) = BACKEND_HEALTH_GAUGES.lock() {
        gauges.insert(endpoint_url.to_string(), value);
    } else {
        tracing::error!("failed to acquire lock for backend health gauges");
        return;
    }

    gauge!(BACKEND_HEALTH_STATUS, "endpoint" => endpoint_url.to_string()).set(value);
}

/// Increment the total request counter for an inbound gateway request.
pub fn increment_request_total(path: &str, method: &str, status: u16, protocol: &str) {
    counter!(
        REQUESTS_TOTAL,
        "path" => path.to_string(),
        "method" => method.to_string(),
        "status" => status.to_string(),
        "protocol" => protocol.to_string(),
    )
    .increment(1);
}

/// Record a completed inbound request's duration.
pub fn record_request_duration(path: &str, method: &str, protocol: &str, duration: std::time::Duration) {
    histogram!(
        REQUEST_DURATION_SECONDS,
        "path" => path.to_string(),
        "method" => method.to_string(),
        "protocol" => protocol.to_string(),
    )
    .record(duration.as_secs_f64());
}

/// Increment total count of proxied backend requests.
pub fn increment_backend_request_total(backend: &str, path: &str, method: &str, status: u16) {
    counter!(
        BACKEND_REQUESTS_TOTAL,
        "backend" => backend.to_string(),
        "path" => path.to_string(),
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a completed backend request duration.
pub fn record_backend_request_duration(
    backend: &str,
    path: &str,
    method: &str,
    duration: std::time::Duration,
) {
    histogram!(
        BACKEND_REQUEST_DURATION_SECONDS,
        "backend" => backend.to_string(),
        "path" => path.to_string(),
        "method" => method.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Set current active connection count.
pub fn set_active_connections(count: usize) {
    gauge!(ACTIVE_CONNECTIONS).set(count as f64);
}

/// Set current active in-flight request count.
pub fn set_active_requests(count: u64) {
    gauge!(ACTIVE_REQUESTS).set(count as f64);
}

/// Increment WebSocket connection counter.
pub fn increment_ws_connections() {
    counter!(WEBSOCKET_CONNECTIONS_TOTAL).increment(1);
}

/// Record a WebSocket message (direction ingress/egress, opcode string).
pub fn increment_ws_message(direction: &str, opcode: &str) {
    counter!(WEBSOCKET_MESSAGES_TOTAL, "direction" => direction.to_string(), "opcode" => opcode.to_string())
        .increment(1);
}

/// Add bytes transferred for WebSocket payload.
pub fn add_ws_bytes(direction: &str, bytes: usize) {
    counter!(WEBSOCKET_BYTES_TOTAL, "direction" => direction.to_string()).increment(bytes as u64);
}

/// Increment close code occurrence.
pub fn increment_ws_close_code(code: u16) {
    counter!(WEBSOCKET_CLOSE_CODES_TOTAL, "code" => code.to_string()).increment(1);
}

/// Collect a snapshot of gauge values used for the `/metrics` text exposition.
pub fn get_current_metrics() -> HashMap<String, f64> {
    let mut metrics = HashMap::new();

    if let Ok(gauges) = BACKEND_HEALTH_GAUGES.lock() {
        for (endpoint, health) in gauges.iter() {
            metrics.insert(format!("backend_health_{endpoint}"), *health);
        }
    }

    metrics
}

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder and register metric descriptions. Idempotent: subsequent
/// calls are no-ops, since a recorder can only be installed once per process.
pub fn init_metrics() -> eyre::Result<()> {
    Lazy::force(&BACKEND_HEALTH_GAUGES);

    if PROMETHEUS_HANDLE.get().is_none() {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| eyre::eyre!("failed to install Prometheus recorder: {e}"))?;
        let _ = PROMETHEUS_HANDLE.set(handle);
    }
    Ok(())
}

/// Render the current Prometheus text exposition for the `/metrics` endpoint.
///
/// Returns an empty string if `init_metrics` hasn't run yet.
pub fn render_prometheus_metrics() -> String {
    PROMETHEUS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_backend_health_status() {
        set_backend_health_status("http://test-backend", true);
        assert_eq!(
            BACKEND_HEALTH_GAUGES.lock().unwrap().get("http://test-backend"),
            Some(&1.0)
        );

        set_backend_health_status("http://test-backend", false);
        assert_eq!(
            BACKEND_HEALTH_GAUGES.lock().unwrap().get("http://test-backend"),
            Some(&0.0)
        );
    }

    #[test]
    fn test_init_metrics() {
        assert!(init_metrics().is_ok());
    }

    #[test]
    fn test_get_current_metrics() {
        set_backend_health_status("http://test", true);
        let metrics = get_current_metrics();
        assert!(metrics.contains_key("backend_health_http://test"));
    }
}
