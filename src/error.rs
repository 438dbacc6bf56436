use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Generic 500 message exposed to API clients outside development.
pub const GENERIC_INTERNAL_ERROR: &str = "An internal error occurred";

/// Application-wide error types with appropriate HTTP status codes.
///
/// # Unhandled Errors
///
/// `Internal` and `Unexpected` are not rendered to JSON here. Their response
/// carries an [`UnhandledError`] marker and a plain-text body; the API error
/// responder decides what the client sees based on the request path and the
/// running environment.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Request body too large")]
    PayloadTooLarge,

    #[error("{0}")]
    Internal(String),

    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

/// Structured JSON body returned by every API failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiErrorEnvelope {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ApiErrorEnvelope {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            path: None,
        }
    }

    /// Envelope for unmatched API routes, echoing the original path.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self {
            error: "API endpoint not found".to_string(),
            path: Some(path.into()),
        }
    }

    /// Render the envelope with the given status.
    pub fn into_response_with(self, status: StatusCode) -> Response {
        (status, Json(self)).into_response()
    }
}

/// Marker placed in response extensions when a handler failed unexpectedly.
///
/// Holds the real error text so it can be logged centrally and, in
/// development, shown to the client.
#[derive(Debug, Clone)]
pub struct UnhandledError {
    pub message: String,
}

impl UnhandledError {
    /// Build the provisional 500 response carrying this marker.
    ///
    /// The body is what non-API paths end up serving; API paths get it
    /// replaced by a JSON envelope.
    pub fn into_response(self) -> Response {
        let mut response = (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response();
        response.extensions_mut().insert(self);
        response
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::BadRequest(msg) => {
                ApiErrorEnvelope::new(msg).into_response_with(StatusCode::BAD_REQUEST)
            }
            AppError::NotFound(msg) => {
                ApiErrorEnvelope::new(msg).into_response_with(StatusCode::NOT_FOUND)
            }
            AppError::PayloadTooLarge => ApiErrorEnvelope::new(AppError::PayloadTooLarge.to_string())
                .into_response_with(StatusCode::PAYLOAD_TOO_LARGE),
            // Never expose configuration or internal details directly
            other @ (AppError::ConfigError(_) | AppError::Internal(_) | AppError::Unexpected(_)) => {
                UnhandledError {
                    message: other.to_string(),
                }
                .into_response()
            }
        }
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
