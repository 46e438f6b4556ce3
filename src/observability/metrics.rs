//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_rejections_total` (counter): rejected requests by reason
//! - `gateway_in_flight` (gauge): requests admitted and not yet released
//! - `gateway_request_duration_seconds` (histogram): latency by method, status
//! - `gateway_resource_warnings_total` (counter): monitor warnings by metric
//! - `gateway_active_connections` (gauge): open client connections
//!
//! Recording is a no-op until a recorder is installed, so library users and
//! tests never need to call [`init_metrics`].

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_rejection(reason: &'static str) {
    counter!("gateway_rejections_total", "reason" => reason).increment(1);
}

pub fn record_in_flight(total: usize) {
    gauge!("gateway_in_flight").set(total as f64);
}

/// Label value for a request method. Extension methods collapse into
/// `OTHER` so clients cannot mint new series.
pub fn method_label(method: &str) -> &'static str {
    match method {
        "GET" => "GET",
        "HEAD" => "HEAD",
        "POST" => "POST",
        "PUT" => "PUT",
        "DELETE" => "DELETE",
        "CONNECT" => "CONNECT",
        "OPTIONS" => "OPTIONS",
        "TRACE" => "TRACE",
        "PATCH" => "PATCH",
        _ => "OTHER",
    }
}

pub fn record_request(method: &str, status: u16, elapsed: Duration) {
    histogram!(
        "gateway_request_duration_seconds",
        "method" => method_label(method),
        "status" => status.to_string()
    )
    .record(elapsed.as_secs_f64());
}

pub fn record_resource_warning(metric: &'static str) {
    counter!("gateway_resource_warnings_total", "metric" => metric).increment(1);
}

pub fn record_active_connections(count: u64) {
    gauge!("gateway_active_connections").set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_methods_keep_their_label() {
        assert_eq!(method_label("GET"), "GET");
        assert_eq!(method_label("PATCH"), "PATCH");
    }

    #[test]
    fn extension_methods_share_one_label() {
        assert_eq!(method_label("PURGE"), "OTHER");
        assert_eq!(method_label("X-RANDOM-1234"), "OTHER");
        assert_eq!(method_label("get"), "OTHER");
    }
}
