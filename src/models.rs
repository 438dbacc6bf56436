//! Response bodies of the built-in API endpoints.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service health status
    pub status: String,
    /// Running environment (development / production)
    pub environment: String,
    /// Service version
    pub version: String,
    /// Current timestamp
    pub timestamp: DateTime<Utc>,
}

/// Pipeline statistics.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    /// Uptime in seconds
    pub uptime_seconds: u64,
    /// Whether the rate limiter is active
    pub rate_limit_enabled: bool,
    /// Requests allowed per client per window (0 when disabled)
    pub rate_limit_max_requests: u32,
    /// Window length in seconds
    pub rate_limit_window_seconds: u64,
    /// Client records currently held by the limiter
    pub tracked_clients: usize,
    /// Number of injection rules loaded
    pub injection_rules: usize,
}
