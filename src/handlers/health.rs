//! Health and statistics endpoints.
//!
//! # Endpoints
//!
//! - `GET {API_PREFIX}/health` - Liveness with version and environment
//! - `GET {API_PREFIX}/stats` - Rate limiter and scanner statistics
//!
//! Both sit behind the API pipeline, so they are rate limited like any
//! other API route.

use axum::Json;
use axum::extract::State;
use chrono::Utc;
use tracing::instrument;

use crate::models::{HealthResponse, StatsResponse};
use crate::state::AppState;

/// Health check endpoint.
///
/// # Response Body
///
/// ```json
/// {
///   "status": "healthy",
///   "environment": "production",
///   "version": "0.1.0",
///   "timestamp": "2024-01-15T10:30:00Z"
/// }
/// ```
#[instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        environment: state.config.environment.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
    })
}

/// Statistics endpoint.
///
/// `tracked_clients` includes expired records not yet swept.
#[instrument(skip(state))]
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let limiter = state.rate_limiter.as_deref();

    Json(StatsResponse {
        uptime_seconds: state.uptime_seconds(),
        rate_limit_enabled: limiter.is_some(),
        rate_limit_max_requests: limiter.map_or(0, |l| l.limit()),
        rate_limit_window_seconds: limiter.map_or(0, |l| l.window().as_secs()),
        tracked_clients: limiter.map_or(0, |l| l.tracked_clients()),
        injection_rules: state.scanner.rules().len(),
    })
}
