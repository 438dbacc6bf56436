//! Uniform failure responses for the JSON API.
//!
//! - [`api_not_found`]: fallback of the API router, `404 {"error", "path"}`.
//! - [`handle_panic`]: `CatchPanicLayer` hook turning a handler panic into an
//!   unhandled error.
//! - [`api_error_responder`]: logs every unhandled error (marked with
//!   [`UnhandledError`]) and, on API paths, replaces the body with
//!   `500 {"error": ...}`. The real message is shown in development only;
//!   production clients see [`GENERIC_INTERNAL_ERROR`]. Handlers that return
//!   a bare 5xx without going through `AppError` get the same envelope, with
//!   the status reason as message and their status code kept.
//!
//! Non-API failures are logged but otherwise left to the default handling.

use std::any::Any;

use axum::extract::{OriginalUri, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{debug, error};

use crate::error::{ApiErrorEnvelope, GENERIC_INTERNAL_ERROR, UnhandledError};
use crate::metrics;
use crate::state::AppState;

/// Fallback for unmatched routes under the API prefix.
///
/// Uses `OriginalUri` so the echoed path includes the prefix that the nested
/// router stripped.
pub async fn api_not_found(OriginalUri(uri): OriginalUri) -> Response {
    debug!(path = %uri.path(), "API endpoint not found");
    metrics::record_api_not_found();
    ApiErrorEnvelope::not_found(uri.path()).into_response_with(StatusCode::NOT_FOUND)
}

/// Fallback for unmatched non-API routes when no static directory is served.
pub async fn page_not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not Found").into_response()
}

/// Convert a caught panic payload into an unhandled error response.
pub fn handle_panic(payload: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "handler panicked with a non-string payload".to_string()
    };

    UnhandledError {
        message: format!("panic: {message}"),
    }
    .into_response()
}

/// Middleware logging unhandled errors and shaping API error bodies.
pub async fn api_error_responder(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let response = next.run(request).await;

    let is_api = state.config.is_api_path(&path);
    let status = response.status();
    let marked = response
        .extensions()
        .get::<UnhandledError>()
        .map(|unhandled| unhandled.message.clone());

    let message = match marked {
        Some(message) => message,
        None if is_api && status.is_server_error() && !is_json(response.headers()) => status
            .canonical_reason()
            .unwrap_or("Internal Server Error")
            .to_string(),
        None => return response,
    };

    error!(
        method = %method,
        path = %path,
        request_id = request_id.as_deref().unwrap_or("-"),
        status = status.as_u16(),
        error = %message,
        "Unhandled error while processing request"
    );
    metrics::record_unhandled_error(if is_api { "api" } else { "page" });

    if !is_api {
        return response;
    }

    let message = if state.config.environment.is_production() {
        GENERIC_INTERNAL_ERROR.to_string()
    } else {
        message
    };

    ApiErrorEnvelope::new(message).into_response_with(status)
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.trim_start().to_ascii_lowercase().starts_with("application/json"))
}
