//! Prometheus metrics for the defense pipeline.
//!
//! Metrics are exposed via a dedicated HTTP listener (default: `0.0.0.0:9090`).
//! Recording functions are safe to call before (or without) initialization;
//! the `metrics` facade drops samples when no recorder is installed.
//!
//! # Available Metrics
//!
//! ## Counters
//! - `shield_rate_limited_total` - Requests rejected with 429
//! - `shield_injection_blocked_total` - Requests rejected by the injection scanner (labels: source, rule)
//! - `shield_unhandled_errors_total` - Unhandled handler failures (label: scope = api | page)
//! - `shield_api_not_found_total` - Unmatched API routes
//! - `shield_html_nonce_injections_total` - HTML responses rewritten with a nonce
//!
//! ## Gauges
//! - `shield_rate_limiter_tracked_clients` - Client records held after the last sweep

use std::net::SocketAddr;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const RATE_LIMITED_TOTAL: &str = "shield_rate_limited_total";
    pub const INJECTION_BLOCKED_TOTAL: &str = "shield_injection_blocked_total";
    pub const UNHANDLED_ERRORS_TOTAL: &str = "shield_unhandled_errors_total";
    pub const API_NOT_FOUND_TOTAL: &str = "shield_api_not_found_total";
    pub const HTML_NONCE_INJECTIONS_TOTAL: &str = "shield_html_nonce_injections_total";
    pub const RATE_LIMITER_TRACKED_CLIENTS: &str = "shield_rate_limiter_tracked_clients";
}

/// Install the Prometheus exporter and describe all metrics.
///
/// # Errors
///
/// Returns a message if the exporter cannot be installed (e.g., port in use
/// or a recorder is already set).
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::RATE_LIMITED_TOTAL,
        "Total number of requests rejected by the rate limiter"
    );
    describe_counter!(
        names::INJECTION_BLOCKED_TOTAL,
        "Total number of requests rejected by the injection scanner"
    );
    describe_counter!(
        names::UNHANDLED_ERRORS_TOTAL,
        "Total number of unhandled errors converted to 500 responses"
    );
    describe_counter!(
        names::API_NOT_FOUND_TOTAL,
        "Total number of requests to unknown API endpoints"
    );
    describe_counter!(
        names::HTML_NONCE_INJECTIONS_TOTAL,
        "Total number of HTML responses rewritten with the request nonce"
    );
    describe_gauge!(
        names::RATE_LIMITER_TRACKED_CLIENTS,
        "Client records held by the rate limiter after the last sweep"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

// =============================================================================
// Counter Recording Functions
// =============================================================================

pub fn record_rate_limited() {
    counter!(names::RATE_LIMITED_TOTAL).increment(1);
}

/// Record a blocked request by input surface and matching rule.
pub fn record_injection_blocked(source: &'static str, rule: &'static str) {
    counter!(names::INJECTION_BLOCKED_TOTAL, "source" => source, "rule" => rule).increment(1);
}

/// Record an unhandled error; `scope` is `"api"` or `"page"`.
pub fn record_unhandled_error(scope: &'static str) {
    counter!(names::UNHANDLED_ERRORS_TOTAL, "scope" => scope).increment(1);
}

pub fn record_api_not_found() {
    counter!(names::API_NOT_FOUND_TOTAL).increment(1);
}

pub fn record_html_nonce_injection() {
    counter!(names::HTML_NONCE_INJECTIONS_TOTAL).increment(1);
}

// =============================================================================
// Gauge Recording Functions
// =============================================================================

/// Update the tracked client gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_tracked_clients(count: usize) {
    gauge!(names::RATE_LIMITER_TRACKED_CLIENTS).set(count as f64);
}
