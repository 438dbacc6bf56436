//! Router assembly with the defense pipeline.
//!
//! # Middleware Stack (outermost first)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │   Request ID     │ ← Generates / propagates X-Request-Id
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │     Tracing      │ ← HTTP request/response logging
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │ Security Headers │ ← Nonce + CSP + hardened headers on every response
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │ Error Responder  │ ← Logs unhandled errors, JSON 500 on API paths
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │   HTML Nonce     │ ← Fills __CSP_NONCE__ placeholders in HTML
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │   Catch Panic    │ ← Panics become unhandled errors
//! └────────┬─────────┘
//!          ▼
//!   API_PREFIX? ──yes──► Rate Limit (429) → Injection Guard (400/413) → Handler
//!          │                                          (unmatched → JSON 404)
//!          no
//!          ▼
//!   Static files / index.html, or plain 404
//! ```

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware::{from_fn, from_fn_with_state};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::handlers;
use crate::middleware::{
    RateLimitLayer, api_error_responder, api_not_found, handle_panic, inject_html_nonce,
    injection_guard, page_not_found, security_headers,
};
use crate::state::AppState;

/// Build the application router around the given API routes.
///
/// `api_routes` are mounted under `config.api_prefix` together with the
/// built-in `/health` and `/stats` endpoints, and run behind the rate
/// limiter and injection guard. Everything else is served from
/// `config.static_dir` (falling back to its `index.html`) or answered with a
/// plain 404.
///
/// # Example
///
/// ```rust,ignore
/// let api = Router::new().route("/jobs", post(create_job));
/// let app = build_router(state, api);
/// ```
pub fn build_router(state: AppState, api_routes: Router<AppState>) -> Router {
    let config = state.config.clone();

    // =========================================================================
    // API Router
    // =========================================================================
    let mut api = api_routes
        .merge(handlers::builtin_routes())
        .route_layer(from_fn_with_state(state.clone(), injection_guard))
        .fallback(api_not_found)
        .layer(DefaultBodyLimit::max(config.max_request_body_size));

    if let Some(limiter) = state.rate_limiter.clone() {
        api = api.layer(RateLimitLayer::new(limiter, state.trusted_proxies.clone()));
    }

    let mut router = Router::new().nest(&config.api_prefix, api);

    // =========================================================================
    // Non-API Fallback
    // =========================================================================
    router = match &config.static_dir {
        Some(dir) => {
            info!(dir = %dir.display(), "Serving static files");
            router.fallback_service(
                ServeDir::new(dir).fallback(ServeFile::new(dir.join("index.html"))),
            )
        }
        None => router.fallback(page_not_found),
    };

    // =========================================================================
    // Pipeline (applied bottom to top: last layer runs first)
    // =========================================================================
    router
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(from_fn(inject_html_nonce))
        .layer(from_fn_with_state(state.clone(), api_error_responder))
        .layer(from_fn_with_state(state.clone(), security_headers))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}
