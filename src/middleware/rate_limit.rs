//! Rate limiting middleware over a [`ClientRateLimiter`].
//!
//! Applied to the API router only. Static assets and the HTML shell are not
//! counted.
//!
//! # Response Headers
//!
//! On rate limit exceeded (429):
//! - `Retry-After`: Seconds until the client's window resets (at least 1)
//! - `X-RateLimit-Limit`: Requests allowed per window
//! - `X-RateLimit-Remaining`: Always `0`
//!
//! Body: `{"error":"Too many requests. Please try again later."}`
//!
//! # Client Keys
//!
//! Keys come from [`extract_client_ip`], so forwarded headers only count when
//! the peer is a trusted proxy. See `middleware::ip` for the spoofing caveats.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::header::RETRY_AFTER;
use axum::http::{Request, Response, StatusCode};
use axum::response::IntoResponse;
use tower::{Layer, Service};
use tracing::warn;

use super::ip::{TrustedProxyConfig, extract_client_ip};
use crate::error::ApiErrorEnvelope;
use crate::limiter::{ClientRateLimiter, RateDecision};
use crate::metrics;

/// Error message for rejected requests.
pub const RATE_LIMIT_MESSAGE: &str = "Too many requests. Please try again later.";

/// Rate limiting layer for Tower middleware stack.
///
/// # Example
///
/// ```rust,ignore
/// let limiter = Arc::new(FixedWindowLimiter::new(100, Duration::from_secs(60))?);
/// let api = Router::new()
///     .route("/jobs", get(list_jobs))
///     .layer(RateLimitLayer::new(limiter, Arc::new(TrustedProxyConfig::disabled())));
/// ```
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<dyn ClientRateLimiter>,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl RateLimitLayer {
    pub fn new(limiter: Arc<dyn ClientRateLimiter>, trusted_proxies: Arc<TrustedProxyConfig>) -> Self {
        Self {
            limiter,
            trusted_proxies,
        }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
            trusted_proxies: self.trusted_proxies.clone(),
        }
    }
}

/// Rate limiting service wrapper.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: Arc<dyn ClientRateLimiter>,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        // Swap in a fresh clone so the instance that was polled ready handles this call
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let client_ip = extract_client_ip(&req, &self.trusted_proxies);
        let decision = self.limiter.check(&client_ip);
        let limit = self.limiter.limit();

        Box::pin(async move {
            match decision {
                RateDecision::Allow { .. } => inner.call(req).await,
                RateDecision::Reject { retry_after } => {
                    // Round up so clients never retry before the reset
                    let retry_after_secs = retry_after
                        .as_secs()
                        .saturating_add(u64::from(retry_after.subsec_nanos() > 0))
                        .max(1);

                    warn!(
                        client_ip = %client_ip,
                        method = %req.method(),
                        path = %req.uri().path(),
                        retry_after_secs,
                        "Rate limit exceeded"
                    );
                    metrics::record_rate_limited();

                    Ok(too_many_requests(limit, retry_after_secs))
                }
            }
        })
    }
}

fn too_many_requests(limit: u32, retry_after_secs: u64) -> Response<Body> {
    (
        StatusCode::TOO_MANY_REQUESTS,
        [
            (RETRY_AFTER.as_str(), retry_after_secs.to_string()),
            ("x-ratelimit-limit", limit.to_string()),
            ("x-ratelimit-remaining", "0".to_string()),
        ],
        axum::Json(ApiErrorEnvelope::new(RATE_LIMIT_MESSAGE)),
    )
        .into_response()
}
