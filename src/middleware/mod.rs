//! HTTP middleware making up the request defense pipeline.
//!
//! - **Security Headers**: Per-request CSP nonce and hardened response headers
//! - **HTML Nonce**: Placeholder substitution in server-rendered HTML
//! - **Rate Limiting**: Fixed-window counting per client on API routes
//! - **Injection Guard**: SQL-injection heuristics over query, route and body
//! - **Error Responder**: JSON 404/500 envelopes for the API
//! - **Client Identity**: Peer address with opt-in trusted proxy headers
//!
//! # Architecture
//!
//! ```text
//! Request → Request ID → Trace → Security Headers → Error Responder → HTML Nonce
//!         → Catch Panic → Router ─┬─ /api → Rate Limit → Injection Guard → Handler
//!                                 │            ↓               ↓
//!                                 │      429 Too Many     400 Invalid input
//!                                 └─ other → static files / 404
//! ```

pub mod error_responder;
pub mod html_nonce;
pub mod injection;
pub mod ip;
pub mod rate_limit;
pub mod security_headers;

pub use error_responder::{api_error_responder, api_not_found, handle_panic, page_not_found};
pub use html_nonce::inject_html_nonce;
pub use injection::injection_guard;
pub use ip::{CidrRange, TrustedProxyConfig, UNKNOWN_CLIENT, extract_client_ip};
pub use rate_limit::{RateLimitLayer, RateLimitService};
pub use security_headers::{SecurityHeaders, security_headers};
