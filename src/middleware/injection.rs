//! Request-level SQL-injection screening for API routes.
//!
//! Installed with `route_layer` so it runs after routing, where the matched
//! route parameters are available. For each request it:
//!
//! 1. Decodes the query string into a JSON object (repeated keys become arrays).
//! 2. Collects the raw route parameters.
//! 3. Buffers and parses JSON or form bodies, up to `MAX_REQUEST_BODY_SIZE`.
//! 4. Runs the [`InjectionScanner`] over all three.
//!
//! A hit returns `400 {"error":"Invalid input format"}` and logs a warning
//! with the client, method, path, query, route parameters and matching rule.
//! The body is never logged. Clean requests continue with the buffered body
//! reattached.
//!
//! Query and route values reach the rules already percent-decoded; JSON
//! string values are scanned as sent.

use std::borrow::Cow;

use axum::body::{Body, Bytes, to_bytes};
use axum::extract::rejection::RawPathParamsRejection;
use axum::extract::{RawPathParams, Request, State};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::ip::extract_client_ip_from_parts;
use crate::error::{ApiErrorEnvelope, AppError};
use crate::metrics;
use crate::scanner::ScanVerdict;
use crate::state::AppState;

/// Error message returned for suspicious input.
pub const INVALID_INPUT_MESSAGE: &str = "Invalid input format";

/// Body encodings the scanner understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyKind {
    Json,
    Form,
}

fn body_kind(headers: &HeaderMap) -> Option<BodyKind> {
    let content_type = headers.get(CONTENT_TYPE)?.to_str().ok()?;
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if mime == "application/json" || mime.ends_with("+json") {
        Some(BodyKind::Json)
    } else if mime == "application/x-www-form-urlencoded" {
        Some(BodyKind::Form)
    } else {
        None
    }
}

/// Build a JSON object from decoded `key=value` pairs.
///
/// Repeated keys collapse into an array in order of appearance.
pub fn pairs_to_value<'a, I>(pairs: I) -> Value
where
    I: IntoIterator<Item = (Cow<'a, str>, Cow<'a, str>)>,
{
    let mut map = Map::new();
    for (key, value) in pairs {
        let value = Value::String(value.into_owned());
        match map.get_mut(&*key) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                map.insert(key.into_owned(), value);
            }
        }
    }
    Value::Object(map)
}

/// Decode a raw query or form body.
pub fn parse_urlencoded(input: &[u8]) -> Value {
    pairs_to_value(url::form_urlencoded::parse(input))
}

fn parse_body(kind: BodyKind, bytes: &Bytes) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    match kind {
        // Malformed JSON is still scanned as text; the handler rejects it afterwards
        BodyKind::Json => serde_json::from_slice(bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned())),
        BodyKind::Form => parse_urlencoded(bytes),
    }
}

fn declared_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Middleware rejecting requests whose inputs match an injection rule.
pub async fn injection_guard(
    State(state): State<AppState>,
    route_params: Result<RawPathParams, RawPathParamsRejection>,
    request: Request,
    next: Next,
) -> Response {
    let query = request
        .uri()
        .query()
        .map(|q| parse_urlencoded(q.as_bytes()))
        .unwrap_or(Value::Null);

    let params = match &route_params {
        Ok(raw) => Value::Object(
            raw.iter()
                .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
                .collect(),
        ),
        Err(e) => {
            debug!(error = %e, "Route parameters unavailable for scanning");
            Value::Null
        }
    };

    let (parts, body) = request.into_parts();
    let limit = state.config.max_request_body_size;

    let (body_value, body) = match body_kind(&parts.headers) {
        Some(kind) => {
            if declared_length(&parts.headers).is_some_and(|len| len > limit) {
                return AppError::PayloadTooLarge.into_response();
            }
            let bytes = match to_bytes(body, limit).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    debug!(error = %e, "Failed to buffer request body for scanning");
                    return AppError::PayloadTooLarge.into_response();
                }
            };
            (parse_body(kind, &bytes), Body::from(bytes))
        }
        None => (Value::Null, body),
    };

    if let ScanVerdict::Suspicious { source, rule } = state.scanner.scan(&query, &params, &body_value) {
        let client_ip = extract_client_ip_from_parts(&parts, &state.trusted_proxies);
        warn!(
            client_ip = %client_ip,
            method = %parts.method,
            path = %parts.uri.path(),
            query = %query,
            route_params = %params,
            source = %source,
            rule,
            timestamp = %Utc::now().to_rfc3339(),
            "Potential SQL injection attempt blocked"
        );
        metrics::record_injection_blocked(source.as_str(), rule);

        return ApiErrorEnvelope::new(INVALID_INPUT_MESSAGE).into_response_with(StatusCode::BAD_REQUEST);
    }

    next.run(Request::from_parts(parts, body)).await
}
