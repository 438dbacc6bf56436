//! Per-request CSP nonces and a typed `Content-Security-Policy` builder.
//!
//! The policy is assembled once at startup as an ordered list of directives.
//! Only [`Source::Nonce`] differs between requests; it is substituted when the
//! policy is rendered for a specific request.

use std::fmt;
use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;

use crate::config::{Config, Environment};

/// Raw entropy per nonce (128 bits).
pub const NONCE_BYTES_LEN: usize = 16;

/// Placeholder that server-rendered HTML uses where the nonce belongs.
pub const NONCE_PLACEHOLDER: &str = "__CSP_NONCE__";

/// Origins allowed in `connect-src` only while developing locally.
const DEV_CONNECT_ORIGINS: [&str; 2] = ["http://localhost:*", "ws://localhost:*"];

// =============================================================================
// Nonce
// =============================================================================

/// A CSP nonce, generated fresh for each request.
///
/// Stored in request extensions by the security headers middleware, so that
/// concurrent requests never observe each other's value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CspNonce(Arc<str>);

impl CspNonce {
    /// Generate a new nonce from the thread-local CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; NONCE_BYTES_LEN];
        rand::rng().fill_bytes(&mut bytes);
        Self(STANDARD.encode(bytes).into())
    }

    pub fn value(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CspNonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Extract the current request's nonce in handlers that render HTML.
///
/// Falls back to an empty nonce (which matches no script) if the security
/// headers middleware is not installed.
impl<S> FromRequestParts<S> for CspNonce
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<Self>().cloned().unwrap_or_else(|| {
            tracing::warn!("CSP nonce missing from request extensions - middleware misconfigured");
            Self(Arc::from(""))
        }))
    }
}

// =============================================================================
// Policy Builder
// =============================================================================

/// CSP directives emitted by this crate, in rendering order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    DefaultSrc,
    ConnectSrc,
    ScriptSrc,
    StyleSrc,
    ImgSrc,
    ObjectSrc,
    BaseUri,
    FormAction,
    FrameAncestors,
    UpgradeInsecureRequests,
    BlockAllMixedContent,
}

impl Directive {
    pub fn as_str(self) -> &'static str {
        match self {
            Directive::DefaultSrc => "default-src",
            Directive::ConnectSrc => "connect-src",
            Directive::ScriptSrc => "script-src",
            Directive::StyleSrc => "style-src",
            Directive::ImgSrc => "img-src",
            Directive::ObjectSrc => "object-src",
            Directive::BaseUri => "base-uri",
            Directive::FormAction => "form-action",
            Directive::FrameAncestors => "frame-ancestors",
            Directive::UpgradeInsecureRequests => "upgrade-insecure-requests",
            Directive::BlockAllMixedContent => "block-all-mixed-content",
        }
    }
}

/// A source expression inside a directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    SelfOrigin,
    None,
    UnsafeInline,
    /// `'nonce-<value>'`, rendered with the current request's nonce.
    Nonce,
    /// Scheme source such as `data:` or `https:`.
    Scheme(&'static str),
    /// Host source such as `https://cdn.example.com`.
    Host(String),
}

impl Source {
    fn render_into(&self, out: &mut String, nonce: &str) {
        match self {
            Source::SelfOrigin => out.push_str("'self'"),
            Source::None => out.push_str("'none'"),
            Source::UnsafeInline => out.push_str("'unsafe-inline'"),
            Source::Nonce => {
                out.push_str("'nonce-");
                out.push_str(nonce);
                out.push('\'');
            }
            Source::Scheme(scheme) => out.push_str(scheme),
            Source::Host(host) => out.push_str(host),
        }
    }
}

/// Ordered `Content-Security-Policy` as directive → sources entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CspPolicy {
    directives: Vec<(Directive, Vec<Source>)>,
}

impl CspPolicy {
    pub fn builder() -> CspPolicyBuilder {
        CspPolicyBuilder::default()
    }

    /// Policy for the configured environment and trusted origins.
    ///
    /// `style-src` keeps `'unsafe-inline'` because the frontend framework
    /// injects inline styles. Production additionally forbids framing and
    /// mixed content.
    pub fn from_config(config: &Config) -> Self {
        let mut connect = vec![Source::SelfOrigin];
        connect.extend(config.csp_connect_origins.iter().cloned().map(Source::Host));
        if config.environment == Environment::Development {
            connect.extend(DEV_CONNECT_ORIGINS.iter().map(|o| Source::Host((*o).to_string())));
        }

        let mut script = vec![Source::SelfOrigin, Source::Nonce];
        script.extend(config.csp_script_origins.iter().cloned().map(Source::Host));

        let mut img = vec![Source::SelfOrigin, Source::Scheme("data:")];
        if config.csp_img_allow_remote {
            img.extend([Source::Scheme("https:"), Source::Scheme("blob:")]);
        }

        let mut builder = Self::builder()
            .directive(Directive::DefaultSrc, [Source::SelfOrigin])
            .directive(Directive::ConnectSrc, connect)
            .directive(Directive::ScriptSrc, script)
            .directive(Directive::StyleSrc, [Source::SelfOrigin, Source::UnsafeInline])
            .directive(Directive::ImgSrc, img)
            .directive(Directive::ObjectSrc, [Source::None])
            .directive(Directive::BaseUri, [Source::SelfOrigin])
            .directive(Directive::FormAction, [Source::SelfOrigin]);

        if config.environment.is_production() {
            builder = builder
                .directive(Directive::FrameAncestors, [Source::None])
                .flag(Directive::UpgradeInsecureRequests)
                .flag(Directive::BlockAllMixedContent);
        }

        builder.build()
    }

    pub fn directives(&self) -> impl Iterator<Item = (Directive, &[Source])> {
        self.directives.iter().map(|(d, s)| (*d, s.as_slice()))
    }

    pub fn sources(&self, directive: Directive) -> Option<&[Source]> {
        self.directives
            .iter()
            .find(|(d, _)| *d == directive)
            .map(|(_, s)| s.as_slice())
    }

    /// Render the header value for one request.
    pub fn render(&self, nonce: &CspNonce) -> String {
        let mut out = String::with_capacity(256);
        for (i, (directive, sources)) in self.directives.iter().enumerate() {
            if i > 0 {
                out.push_str("; ");
            }
            out.push_str(directive.as_str());
            for source in sources {
                out.push(' ');
                source.render_into(&mut out, nonce.value());
            }
        }
        out
    }
}

/// Builder keeping directives in insertion order.
///
/// Adding a directive twice merges the sources into the first entry.
#[derive(Debug, Default)]
pub struct CspPolicyBuilder {
    directives: Vec<(Directive, Vec<Source>)>,
}

impl CspPolicyBuilder {
    pub fn directive(mut self, directive: Directive, sources: impl IntoIterator<Item = Source>) -> Self {
        match self.directives.iter_mut().find(|(d, _)| *d == directive) {
            Some((_, existing)) => {
                for source in sources {
                    if !existing.contains(&source) {
                        existing.push(source);
                    }
                }
            }
            None => self.directives.push((directive, sources.into_iter().collect())),
        }
        self
    }

    /// Add a directive without sources, e.g. `upgrade-insecure-requests`.
    pub fn flag(self, directive: Directive) -> Self {
        self.directive(directive, Vec::new())
    }

    pub fn build(self) -> CspPolicy {
        CspPolicy {
            directives: self.directives,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn fixed_nonce() -> CspNonce {
        CspNonce(Arc::from("abc123=="))
    }

    #[test]
    fn test_nonce_decodes_to_sixteen_bytes() {
        let nonce = CspNonce::generate();
        let decoded = STANDARD.decode(nonce.value()).unwrap();
        assert_eq!(decoded.len(), NONCE_BYTES_LEN);
    }

    #[test]
    fn test_nonces_are_distinct() {
        let nonces: HashSet<String> = (0..1000)
            .map(|_| CspNonce::generate().value().to_string())
            .collect();
        assert_eq!(nonces.len(), 1000);
    }

    #[test]
    fn test_script_src_embeds_nonce() {
        let policy = CspPolicy::from_config(&Config::default());
        let header = policy.render(&fixed_nonce());

        assert!(header.contains("script-src 'self' 'nonce-abc123=='"));
    }

    #[test]
    fn test_development_policy() {
        let policy = CspPolicy::from_config(&Config::default());
        let header = policy.render(&fixed_nonce());

        assert_eq!(
            header,
            "default-src 'self'; \
             connect-src 'self' http://localhost:* ws://localhost:*; \
             script-src 'self' 'nonce-abc123=='; \
             style-src 'self' 'unsafe-inline'; \
             img-src 'self' data:; \
             object-src 'none'; \
             base-uri 'self'; \
             form-action 'self'"
        );
    }

    #[test]
    fn test_production_policy_adds_hardening_and_drops_localhost() {
        let config = Config {
            environment: Environment::Production,
            csp_connect_origins: vec!["https://backend.example.co".to_string()],
            csp_script_origins: vec!["https://cdn.example.com".to_string()],
            ..Config::default()
        };
        let policy = CspPolicy::from_config(&config);
        let header = policy.render(&fixed_nonce());

        assert!(header.contains("connect-src 'self' https://backend.example.co;"));
        assert!(header.contains("script-src 'self' 'nonce-abc123==' https://cdn.example.com;"));
        assert!(!header.contains("localhost"));
        assert!(header.ends_with(
            "frame-ancestors 'none'; upgrade-insecure-requests; block-all-mixed-content"
        ));
    }

    #[test]
    fn test_remote_images_extend_img_src() {
        let config = Config {
            csp_img_allow_remote: true,
            ..Config::default()
        };
        let policy = CspPolicy::from_config(&config);

        assert_eq!(
            policy.sources(Directive::ImgSrc).unwrap(),
            &[
                Source::SelfOrigin,
                Source::Scheme("data:"),
                Source::Scheme("https:"),
                Source::Scheme("blob:"),
            ]
        );
    }

    #[test]
    fn test_builder_merges_repeated_directive() {
        let policy = CspPolicy::builder()
            .directive(Directive::ScriptSrc, [Source::SelfOrigin])
            .directive(Directive::DefaultSrc, [Source::None])
            .directive(
                Directive::ScriptSrc,
                [Source::SelfOrigin, Source::Host("https://cdn.test".into())],
            )
            .build();

        let order: Vec<Directive> = policy.directives().map(|(d, _)| d).collect();
        assert_eq!(order, vec![Directive::ScriptSrc, Directive::DefaultSrc]);
        assert_eq!(policy.sources(Directive::ScriptSrc).unwrap().len(), 2);
    }
}
