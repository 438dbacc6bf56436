//! Client identity extraction for rate limiting and security logging.
//!
//! # Identity Sources
//!
//! The transport peer address (from Axum's `ConnectInfo`) is the default and
//! only trustworthy identity. Forwarded headers are consulted only when
//! `TRUST_PROXY` is enabled **and** the peer falls inside `TRUSTED_PROXIES`
//! (an empty list trusts every peer):
//!
//! 1. `X-Forwarded-For` (first, client-most entry)
//! 2. `X-Real-IP`
//! 3. Peer address
//! 4. [`UNKNOWN_CLIENT`] when the server was not started with connect info
//!
//! # Security Warning: IP Spoofing Risk
//!
//! With `TRUST_PROXY` enabled and no CIDR ranges, any client reaching the
//! service directly can pick its own rate limit key by sending
//! `X-Forwarded-For`. Configure `TRUSTED_PROXIES` or block direct access.
//!
//! ## The "unknown" Fallback
//!
//! All requests without an identifiable address share the `"unknown"` key and
//! are therefore rate-limited collectively.

use std::borrow::Cow;
use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::request::Parts;
use axum::http::{Extensions, HeaderMap, Request};
use tracing::{debug, warn};

/// Fallback key when no client address can be determined.
pub const UNKNOWN_CLIENT: &str = "unknown";

// =============================================================================
// Trusted Proxy CIDR Matching
// =============================================================================

/// Parsed CIDR network range for trusted proxy validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CidrRange {
    network: IpAddr,
    prefix_len: u8,
}

impl CidrRange {
    /// Parse CIDR notation (`"10.0.0.0/8"`, `"::1/128"`) or a bare address.
    ///
    /// Returns `None` if the format is invalid.
    pub fn parse(cidr: &str) -> Option<Self> {
        let (addr, prefix) = match cidr.trim().split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (cidr.trim(), None),
        };

        let network: IpAddr = addr.parse().ok()?;
        let max_prefix = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };

        let prefix_len = match prefix {
            Some(p) => p.parse::<u8>().ok().filter(|len| *len <= max_prefix)?,
            None => max_prefix,
        };

        Some(Self {
            network,
            prefix_len,
        })
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Check if an IP address is contained within this CIDR range.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (&self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = if self.prefix_len == 0 {
                    0
                } else {
                    u32::MAX << (32 - self.prefix_len)
                };
                (u32::from(*net) & mask) == (u32::from(*addr) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = if self.prefix_len == 0 {
                    0
                } else {
                    u128::MAX << (128 - self.prefix_len)
                };
                (u128::from(*net) & mask) == (u128::from(*addr) & mask)
            }
            (IpAddr::V6(_), IpAddr::V4(_)) | (IpAddr::V4(_), IpAddr::V6(_)) => false,
        }
    }
}

/// Which peers may supply a forwarded client address.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxyConfig {
    trust_proxy: bool,
    ranges: Vec<CidrRange>,
}

impl TrustedProxyConfig {
    /// Never consult forwarded headers.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Build from the `TRUST_PROXY` flag and `TRUSTED_PROXIES` CIDR strings.
    ///
    /// Invalid CIDR strings are logged as warnings and skipped.
    pub fn new(trust_proxy: bool, cidrs: &[String]) -> Self {
        let ranges: Vec<CidrRange> = cidrs
            .iter()
            .filter_map(|cidr| {
                let parsed = CidrRange::parse(cidr);
                if parsed.is_none() {
                    warn!(cidr = %cidr, "Invalid CIDR range in TRUSTED_PROXIES, skipping");
                }
                parsed
            })
            .collect();

        if trust_proxy {
            if ranges.is_empty() {
                warn!("TRUST_PROXY enabled without TRUSTED_PROXIES; forwarded headers are trusted from any peer");
            } else {
                debug!(count = ranges.len(), "Trusted proxy validation enabled");
            }
        }

        Self {
            trust_proxy,
            ranges,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.trust_proxy
    }

    /// Whether forwarded headers from this peer should be honored.
    ///
    /// A missing peer is only trusted when no ranges restrict the source.
    pub fn is_trusted(&self, peer: Option<IpAddr>) -> bool {
        if !self.trust_proxy {
            return false;
        }
        if self.ranges.is_empty() {
            return true;
        }
        peer.is_some_and(|ip| self.ranges.iter().any(|range| range.contains(&ip)))
    }
}

// =============================================================================
// Extraction
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ForwardedIp<'a> {
    FromXff(&'a str),
    FromRealIp(&'a str),
    NotFound,
}

/// Read the forwarded client address, skipping empty values.
#[inline]
fn forwarded_ip(headers: &HeaderMap) -> ForwardedIp<'_> {
    // Format: "client, proxy1, proxy2" - we want the first (client) IP
    if let Some(forwarded) = headers.get("x-forwarded-for")
        && let Ok(value) = forwarded.to_str()
        && let Some(first_ip) = value.split(',').next().map(str::trim)
        && !first_ip.is_empty()
    {
        return ForwardedIp::FromXff(first_ip);
    }

    if let Some(real_ip) = headers.get("x-real-ip")
        && let Ok(value) = real_ip.to_str()
        && !value.trim().is_empty()
    {
        return ForwardedIp::FromRealIp(value.trim());
    }

    ForwardedIp::NotFound
}

/// Peer address recorded by `into_make_service_with_connect_info`.
pub fn peer_addr(extensions: &Extensions) -> Option<SocketAddr> {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

/// Resolve the client identity used as rate limit key and in security logs.
///
/// Returns `Cow::Borrowed` for the shared "unknown" key and an owned string
/// otherwise.
#[inline]
pub fn extract_client_ip<B>(req: &Request<B>, proxies: &TrustedProxyConfig) -> Cow<'static, str> {
    resolve_client_ip(req.headers(), req.extensions(), proxies)
}

/// Same as [`extract_client_ip`] for a request already split into parts.
#[inline]
pub fn extract_client_ip_from_parts(parts: &Parts, proxies: &TrustedProxyConfig) -> Cow<'static, str> {
    resolve_client_ip(&parts.headers, &parts.extensions, proxies)
}

fn resolve_client_ip(
    headers: &HeaderMap,
    extensions: &Extensions,
    proxies: &TrustedProxyConfig,
) -> Cow<'static, str> {
    let peer = peer_addr(extensions).map(|addr| addr.ip());

    if proxies.is_trusted(peer) {
        match forwarded_ip(headers) {
            ForwardedIp::FromXff(ip) | ForwardedIp::FromRealIp(ip) => {
                return Cow::Owned(ip.to_string());
            }
            ForwardedIp::NotFound => {
                debug!("No forwarded headers from trusted peer - request may be bypassing the proxy");
            }
        }
    } else if proxies.is_enabled() && forwarded_ip(headers) != ForwardedIp::NotFound {
        debug!(
            peer = ?peer,
            "Ignoring forwarded client address from untrusted peer"
        );
    }

    match peer {
        Some(ip) => Cow::Owned(ip.to_string()),
        None => Cow::Borrowed(UNKNOWN_CLIENT),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use axum::body::Body;

    use super::*;

    fn request(peer: Option<&str>, headers: &[(&str, &str)]) -> Request<Body> {
        let mut builder = Request::builder();
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let mut req = builder.body(Body::empty()).unwrap();
        if let Some(peer) = peer {
            let addr: SocketAddr = peer.parse().unwrap();
            req.extensions_mut().insert(ConnectInfo(addr));
        }
        req
    }

    fn trusting(cidrs: &[&str]) -> TrustedProxyConfig {
        let cidrs: Vec<String> = cidrs.iter().map(|c| c.to_string()).collect();
        TrustedProxyConfig::new(true, &cidrs)
    }

    // ==========================================================================
    // CIDR Range Tests
    // ==========================================================================

    #[test]
    fn test_cidr_parse_ipv4() {
        assert_eq!(CidrRange::parse("10.0.0.0/8").unwrap().prefix_len(), 8);
    }

    #[test]
    fn test_cidr_parse_ipv6() {
        assert_eq!(CidrRange::parse("::1/128").unwrap().prefix_len(), 128);
    }

    #[test]
    fn test_cidr_parse_single_ip() {
        assert_eq!(CidrRange::parse("192.168.1.1").unwrap().prefix_len(), 32);
    }

    #[test]
    fn test_cidr_parse_invalid() {
        assert!(CidrRange::parse("not-an-ip").is_none());
        assert!(CidrRange::parse("10.0.0.0/33").is_none());
        assert!(CidrRange::parse("10.0.0.0/x").is_none());
    }

    #[test]
    fn test_cidr_contains_ipv4() {
        let cidr = CidrRange::parse("10.0.0.0/8").unwrap();

        assert!(cidr.contains(&"10.0.0.1".parse().unwrap()));
        assert!(cidr.contains(&"10.255.255.255".parse().unwrap()));
        assert!(!cidr.contains(&"11.0.0.1".parse().unwrap()));
        assert!(!cidr.contains(&"::ffff:10.0.0.1".parse().unwrap()));
    }

    #[test]
    fn test_cidr_zero_prefix_matches_family() {
        let cidr = CidrRange::parse("0.0.0.0/0").unwrap();
        assert!(cidr.contains(&"203.0.113.9".parse().unwrap()));
        assert!(!cidr.contains(&"2001:db8::1".parse().unwrap()));
    }

    // ==========================================================================
    // Trust Decisions
    // ==========================================================================

    #[test]
    fn test_disabled_config_trusts_nobody() {
        let config = TrustedProxyConfig::disabled();
        assert!(!config.is_trusted(Some("10.0.0.1".parse().unwrap())));
        assert!(!config.is_trusted(None));
    }

    #[test]
    fn test_enabled_without_ranges_trusts_any_peer() {
        let config = trusting(&[]);
        assert!(config.is_trusted(Some("8.8.8.8".parse().unwrap())));
        assert!(config.is_trusted(None));
    }

    #[test]
    fn test_enabled_with_ranges() {
        let config = trusting(&["10.0.0.0/8", "172.16.0.0/12", "garbage"]);

        assert!(config.is_trusted(Some("172.31.255.255".parse().unwrap())));
        assert!(!config.is_trusted(Some("192.168.1.1".parse().unwrap())));
        assert!(!config.is_trusted(None));
    }

    // ==========================================================================
    // Extraction
    // ==========================================================================

    #[test]
    fn test_peer_address_used_by_default() {
        let req = request(Some("198.51.100.7:52100"), &[("x-forwarded-for", "1.2.3.4")]);
        assert_eq!(extract_client_ip(&req, &TrustedProxyConfig::disabled()), "198.51.100.7");
    }

    #[test]
    fn test_unknown_without_peer_is_borrowed() {
        let req = request(None, &[]);
        let ip = extract_client_ip(&req, &TrustedProxyConfig::disabled());

        assert_eq!(ip, UNKNOWN_CLIENT);
        assert!(matches!(ip, Cow::Borrowed(_)));
    }

    #[test]
    fn test_xff_first_entry_from_trusted_peer() {
        let req = request(
            Some("10.0.0.2:443"),
            &[("x-forwarded-for", "  203.0.113.50 , 70.41.3.18")],
        );
        assert_eq!(extract_client_ip(&req, &trusting(&["10.0.0.0/8"])), "203.0.113.50");
    }

    #[test]
    fn test_xff_priority_over_real_ip() {
        let req = request(
            Some("10.0.0.2:443"),
            &[("x-forwarded-for", "10.9.9.9"), ("x-real-ip", "192.168.1.1")],
        );
        assert_eq!(extract_client_ip(&req, &trusting(&[])), "10.9.9.9");
    }

    #[test]
    fn test_real_ip_when_xff_empty() {
        let req = request(
            Some("10.0.0.2:443"),
            &[("x-forwarded-for", " "), ("x-real-ip", "2001:db8::1")],
        );
        assert_eq!(extract_client_ip(&req, &trusting(&[])), "2001:db8::1");
    }

    #[test]
    fn test_untrusted_peer_cannot_spoof() {
        let req = request(Some("8.8.8.8:1234"), &[("x-forwarded-for", "10.0.0.5")]);
        assert_eq!(extract_client_ip(&req, &trusting(&["10.0.0.0/8"])), "8.8.8.8");
    }

    #[test]
    fn test_trusted_peer_without_headers_falls_back_to_peer() {
        let req = request(Some("10.0.0.2:443"), &[]);
        assert_eq!(extract_client_ip(&req, &trusting(&["10.0.0.0/8"])), "10.0.0.2");
    }
}
