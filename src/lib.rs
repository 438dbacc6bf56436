//! # Request Shield
//!
//! A request defense pipeline for Axum services, featuring:
//!
//! - **Content Security Policy**: Fresh nonce per request, hardened headers
//! - **HTML Nonce Injection**: `__CSP_NONCE__` placeholders filled in outgoing pages
//! - **Rate Limiting**: Fixed-window counting per client on API routes
//! - **Injection Screening**: SQL-injection heuristics over query, route params and body
//! - **API Errors**: JSON 404 for unknown endpoints, environment-aware 500s
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Request ID → Trace → Security Headers → Error Responder    │
//! │  → HTML Nonce → Catch Panic                                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │  API_PREFIX: Rate Limit → Injection Guard → Handlers        │
//! │  otherwise:  Static files / index.html / plain 404          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  FixedWindowLimiter (DashMap)   InjectionScanner (regex)    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use axum::{Router, routing::get};
//! use request_shield::{AppState, Config, build_router};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let state = AppState::new(config)?;
//!
//!     let api = Router::new().route("/hello", get(|| async { "hello" }));
//!     let app = build_router(state.clone(), api);
//!
//!     // Start the server with `into_make_service_with_connect_info::<SocketAddr>()`...
//!     state.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! Tighten the rate limit:
//! ```bash
//! RATE_LIMIT_MAX_REQUESTS=20 RATE_LIMIT_WINDOW_SECS=10 cargo run
//! ```
//!
//! Run behind a reverse proxy:
//! ```bash
//! TRUST_PROXY=true TRUSTED_PROXIES=10.0.0.0/8 cargo run
//! ```

pub mod config;
pub mod csp;
pub mod error;
pub mod handlers;
pub mod limiter;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod scanner;
pub mod state;
pub mod utils;

// Re-exports for convenience
pub use config::{Config, Environment};
pub use csp::{CspNonce, CspPolicy};
pub use error::{AppError, AppResult};
pub use limiter::{ClientRateLimiter, FixedWindowLimiter, RateDecision};
pub use routes::build_router;
pub use scanner::{InjectionScanner, ScanVerdict};
pub use state::AppState;
