//! Substitute the request nonce into server-rendered HTML.
//!
//! Templates mark nonce positions with [`NONCE_PLACEHOLDER`], e.g.
//! `<script nonce="__CSP_NONCE__" src="/app.js"></script>`. Responses are
//! rewritten only when all of the following hold:
//!
//! - a nonce was generated for the request
//! - the `Content-Type` is textual (`text/*` or XHTML)
//! - the body is valid UTF-8 and contains an `<html` tag (case-insensitive)
//! - the body contains the placeholder
//!
//! Everything else, including JSON, binary assets and bodies above
//! [`MAX_HTML_BODY_SIZE`], passes through byte-for-byte.
//!
//! # Caching
//!
//! A rewritten page is only valid together with the CSP header of the same
//! response. Rewritten responses lose `Last-Modified`/`ETag` and are marked
//! `Cache-Control: no-store`, and conditional headers are stripped from
//! document requests so the static fallback never answers `304` with a page
//! the browser cached under an older nonce.

use axum::body::{Body, HttpBody, to_bytes};
use axum::extract::Request;
use axum::http::header::{
    ACCEPT, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH,
    LAST_MODIFIED,
};
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{debug, error};

use crate::csp::{CspNonce, NONCE_PLACEHOLDER};
use crate::error::UnhandledError;
use crate::metrics;

/// Largest body buffered for substitution (8 MiB).
pub const MAX_HTML_BODY_SIZE: usize = 8 * 1024 * 1024;

/// Middleware rewriting nonce placeholders in HTML responses.
pub async fn inject_html_nonce(mut request: Request, next: Next) -> Response {
    let nonce = request.extensions().get::<CspNonce>().cloned();
    if nonce.is_some() && is_document_request(&request) {
        let headers = request.headers_mut();
        headers.remove(IF_MODIFIED_SINCE);
        headers.remove(IF_NONE_MATCH);
    }

    let response = next.run(request).await;

    let Some(nonce) = nonce else {
        return response;
    };
    if !is_textual(response.headers()) {
        return response;
    }

    // Streamed files report their size through Content-Length only
    let declared_len = response
        .body()
        .size_hint()
        .upper()
        .or_else(|| content_length(response.headers()));
    if declared_len.is_some_and(|len| len > MAX_HTML_BODY_SIZE as u64) {
        debug!(len = ?declared_len, "Skipping nonce injection for oversized body");
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match to_bytes(body, MAX_HTML_BODY_SIZE).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(error = %e, "Failed to buffer response body for nonce injection");
            return UnhandledError {
                message: format!("failed to read response body: {e}"),
            }
            .into_response();
        }
    };

    match substitute_nonce(&bytes, nonce.value()) {
        Some(html) => {
            parts.headers.remove(CONTENT_LENGTH);
            parts.headers.remove(LAST_MODIFIED);
            parts.headers.remove(ETAG);
            parts
                .headers
                .insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
            metrics::record_html_nonce_injection();
            Response::from_parts(parts, Body::from(html))
        }
        None => Response::from_parts(parts, Body::from(bytes)),
    }
}

/// Replace every placeholder in an HTML document.
///
/// Returns `None` when the body is not UTF-8 HTML or has nothing to replace.
pub fn substitute_nonce(body: &[u8], nonce: &str) -> Option<String> {
    let text = std::str::from_utf8(body).ok()?;
    if !contains_html_tag(text) || !text.contains(NONCE_PLACEHOLDER) {
        return None;
    }
    Some(text.replace(NONCE_PLACEHOLDER, nonce))
}

/// Whether a request may resolve to a page that gets rewritten.
///
/// True for navigations (`Accept: text/html`) and for paths without an
/// extension or ending in `.html`/`.htm`, which covers the shell fallback.
fn is_document_request(request: &Request) -> bool {
    let accepts_html = request
        .headers()
        .get(ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().contains("text/html"));
    if accepts_html {
        return true;
    }

    let last_segment = request.uri().path().rsplit('/').next().unwrap_or_default();
    match last_segment.rsplit_once('.') {
        None => true,
        Some((_, ext)) => ext.eq_ignore_ascii_case("html") || ext.eq_ignore_ascii_case("htm"),
    }
}

fn contains_html_tag(text: &str) -> bool {
    text.as_bytes()
        .windows(5)
        .any(|w| w.eq_ignore_ascii_case(b"<html"))
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

fn is_textual(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.trim_start().to_ascii_lowercase())
        .is_some_and(|ct| ct.starts_with("text/") || ct.starts_with("application/xhtml+xml"))
}
