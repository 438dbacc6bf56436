//! Per-request nonce generation and security response headers.
//!
//! Runs on every request, API or not:
//!
//! 1. Generates a fresh [`CspNonce`] and stores it in the request extensions
//!    (and, once the response exists, in the response extensions).
//! 2. Sets `Content-Security-Policy` rendered with that nonce, plus the
//!    companion headers below.
//! 3. Removes `X-Powered-By` and `Server` so the stack is not advertised.
//!
//! | Header                              | Value                                   |
//! |-------------------------------------|-----------------------------------------|
//! | `X-Content-Type-Options`            | `nosniff`                               |
//! | `X-Frame-Options`                   | `DENY`                                  |
//! | `Referrer-Policy`                   | `strict-origin-when-cross-origin`       |
//! | `X-DNS-Prefetch-Control`            | `off`                                   |
//! | `X-Permitted-Cross-Domain-Policies` | `none`                                  |
//! | `Cross-Origin-Opener-Policy`        | `same-origin`                           |
//! | `Cross-Origin-Resource-Policy`      | `same-origin`                           |
//! | `Origin-Agent-Cluster`              | `?1`                                    |
//! | `X-XSS-Protection`                  | `1; mode=block`                         |
//!
//! Production adds `Strict-Transport-Security`, `X-Download-Options` and a
//! restrictive `Permissions-Policy`.

use axum::extract::{Request, State};
use axum::http::header::{CONTENT_SECURITY_POLICY, SERVER};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use tracing::error;

use crate::config::Config;
use crate::csp::{CspNonce, CspPolicy};
use crate::error::{AppError, AppResult};
use crate::state::AppState;

const X_POWERED_BY: HeaderName = HeaderName::from_static("x-powered-by");

const BASE_HEADERS: [(&str, &str); 9] = [
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "DENY"),
    ("referrer-policy", "strict-origin-when-cross-origin"),
    ("x-dns-prefetch-control", "off"),
    ("x-permitted-cross-domain-policies", "none"),
    ("cross-origin-opener-policy", "same-origin"),
    ("cross-origin-resource-policy", "same-origin"),
    ("origin-agent-cluster", "?1"),
    ("x-xss-protection", "1; mode=block"),
];

const PRODUCTION_HEADERS: [(&str, &str); 3] = [
    (
        "strict-transport-security",
        "max-age=31536000; includeSubDomains; preload",
    ),
    ("x-download-options", "noopen"),
    ("permissions-policy", "camera=(), microphone=(), geolocation=()"),
];

/// CSP policy plus the static header set, built once at startup.
#[derive(Debug, Clone)]
pub struct SecurityHeaders {
    policy: CspPolicy,
    static_headers: Vec<(HeaderName, HeaderValue)>,
}

impl SecurityHeaders {
    /// Build the header set for the configured environment.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if a configured CSP origin cannot be
    /// represented in a header value.
    pub fn from_config(config: &Config) -> AppResult<Self> {
        let policy = CspPolicy::from_config(config);

        // Origins come from the environment; reject control characters up front
        HeaderValue::from_str(&policy.render(&CspNonce::generate())).map_err(|e| {
            AppError::ConfigError(format!("CSP origins produce an invalid header value: {e}"))
        })?;

        let mut pairs: Vec<(&str, &str)> = BASE_HEADERS.to_vec();
        if config.environment.is_production() {
            pairs.extend(PRODUCTION_HEADERS);
        }

        let static_headers = pairs
            .into_iter()
            .map(|(name, value)| {
                (
                    HeaderName::from_static(name),
                    HeaderValue::from_static(value),
                )
            })
            .collect();

        Ok(Self {
            policy,
            static_headers,
        })
    }

    pub fn policy(&self) -> &CspPolicy {
        &self.policy
    }

    /// Write the security headers for one response.
    pub fn apply(&self, headers: &mut HeaderMap, nonce: &CspNonce) {
        headers.remove(X_POWERED_BY);
        headers.remove(SERVER);

        for (name, value) in &self.static_headers {
            headers.insert(name.clone(), value.clone());
        }

        match HeaderValue::from_str(&self.policy.render(nonce)) {
            Ok(csp) => {
                headers.insert(CONTENT_SECURITY_POLICY, csp);
            }
            // Validated at startup; only reachable with a malformed custom policy
            Err(e) => error!(error = %e, "Failed to encode Content-Security-Policy header"),
        }
    }
}

/// Middleware generating the request nonce and applying security headers.
pub async fn security_headers(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let nonce = CspNonce::generate();
    request.extensions_mut().insert(nonce.clone());

    let mut response = next.run(request).await;

    state.security_headers.apply(response.headers_mut(), &nonce);
    response.extensions_mut().insert(nonce);
    response
}
