//! Built-in API handlers.

mod health;

use axum::Router;
use axum::routing::get;

use crate::state::AppState;

pub use health::{health_check, stats};

/// Routes mounted under the API prefix of every pipeline.
pub fn builtin_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(stats))
}
