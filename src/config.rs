//! Application configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is read once at startup from environment variables with
//! development defaults. In production, configure via environment variables or
//! a `.env` file.
//!
//! # Security Configuration
//!
//! - `APP_ENV`: `development` (default) or `production`
//! - `CSP_CONNECT_ORIGINS`: Comma-separated API origins trusted by `connect-src`
//! - `CSP_SCRIPT_ORIGINS`: Comma-separated CDN origins trusted by `script-src`
//! - `TRUST_PROXY`: Honor `X-Forwarded-For` from trusted peers (default: false)
//! - `TRUSTED_PROXIES`: CIDR ranges of those peers
//!
//! # Rate Limiting
//!
//! - `RATE_LIMIT_WINDOW_SECS`: Fixed window length (default: 60)
//! - `RATE_LIMIT_MAX_REQUESTS`: Requests per client per window (default: 100, 0 = disabled)
//! - `RATE_LIMIT_SWEEP_INTERVAL_SECS`: Eviction interval for expired records (default: 60)

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, AppResult};

/// Running environment, controlling CSP relaxations, HSTS and error masking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn is_production(self) -> bool {
        self == Environment::Production
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(format!(
                "unknown environment '{other}' (expected development or production)"
            )),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}' (expected text or json)")),
        }
    }
}

/// Application configuration loaded from environment variables.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.server_addr());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 3000)
    pub port: u16,

    /// Running environment (default: development)
    pub environment: Environment,

    /// Path prefix of the JSON API (default: "/api")
    pub api_prefix: String,

    /// Directory holding the server-rendered shell and static assets.
    /// Non-API paths fall back to `index.html` in this directory.
    pub static_dir: Option<PathBuf>,

    /// Maximum request body size buffered for scanning (default: 1MB)
    pub max_request_body_size: usize,

    // =========================================================================
    // Content Security Policy
    // =========================================================================
    /// Trusted API origins appended to `connect-src` (managed backend)
    pub csp_connect_origins: Vec<String>,

    /// Trusted CDN origins appended to `script-src`
    pub csp_script_origins: Vec<String>,

    /// Extend `img-src` with `https: blob:` for remotely hosted assets
    pub csp_img_allow_remote: bool,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    /// Fixed window length (default: 60s)
    pub rate_limit_window: Duration,

    /// Requests allowed per client per window (default: 100)
    /// Set to 0 to disable rate limiting
    pub rate_limit_max_requests: u32,

    /// How often expired client records are evicted (default: 60s)
    pub rate_limit_sweep_interval: Duration,

    // =========================================================================
    // Client Identity
    // =========================================================================
    /// Use forwarded client addresses from a reverse proxy (default: false).
    /// When false, the transport peer address is the only identity source.
    pub trust_proxy: bool,

    /// CIDR ranges of trusted reverse proxies.
    /// Empty with `trust_proxy` enabled trusts forwarded headers from any peer.
    pub trusted_proxies: Vec<String>,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log level filter (e.g., "info", "debug")
    pub log_level: String,

    /// Log output format (default: text)
    pub log_format: LogFormat,

    /// Port for Prometheus metrics endpoint (default: 9090, 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if any value fails to parse or the
    /// combination is inconsistent (e.g., zero-length rate limit window).
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("PORT", 3000)?,
            environment: Self::parse_env("APP_ENV", Environment::Development)?,
            api_prefix: env::var("API_PREFIX").unwrap_or_else(|_| "/api".to_string()),
            static_dir: env::var("STATIC_DIR")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            max_request_body_size: Self::parse_env("MAX_REQUEST_BODY_SIZE", 1024 * 1024)?, // 1MB

            // CSP
            csp_connect_origins: Self::parse_list("CSP_CONNECT_ORIGINS"),
            csp_script_origins: Self::parse_list("CSP_SCRIPT_ORIGINS"),
            csp_img_allow_remote: Self::parse_env("CSP_IMG_ALLOW_REMOTE", false)?,

            // Rate limiting
            rate_limit_window: Duration::from_secs(Self::parse_env("RATE_LIMIT_WINDOW_SECS", 60)?),
            rate_limit_max_requests: Self::parse_env("RATE_LIMIT_MAX_REQUESTS", 100)?,
            rate_limit_sweep_interval: Duration::from_secs(Self::parse_env(
                "RATE_LIMIT_SWEEP_INTERVAL_SECS",
                60,
            )?),

            // Client identity
            trust_proxy: Self::parse_env("TRUST_PROXY", false)?,
            trusted_proxies: Self::parse_list("TRUSTED_PROXIES"),

            // Observability
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            log_format: Self::parse_env("LOG_FORMAT", LogFormat::Text)?,
            metrics_port: Self::parse_env("METRICS_PORT", 9090)?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if validation fails.
    pub fn validate(&self) -> AppResult<()> {
        if !self.api_prefix.starts_with('/') || self.api_prefix.len() < 2 || self.api_prefix.ends_with('/') {
            return Err(AppError::ConfigError(format!(
                "API_PREFIX ({}) must start with '/', not end with '/', and not be the root",
                self.api_prefix
            )));
        }

        if self.rate_limit_window.is_zero() {
            return Err(AppError::ConfigError(
                "RATE_LIMIT_WINDOW_SECS must be greater than 0".to_string(),
            ));
        }

        if self.rate_limit_sweep_interval.is_zero() {
            return Err(AppError::ConfigError(
                "RATE_LIMIT_SWEEP_INTERVAL_SECS must be greater than 0".to_string(),
            ));
        }

        if self.max_request_body_size == 0 {
            return Err(AppError::ConfigError(
                "MAX_REQUEST_BODY_SIZE must be greater than 0".to_string(),
            ));
        }

        if !self.trust_proxy && !self.trusted_proxies.is_empty() {
            return Err(AppError::ConfigError(
                "TRUSTED_PROXIES is set but TRUST_PROXY is false; enable TRUST_PROXY explicitly"
                    .to_string(),
            ));
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if rate limiting is enabled.
    pub fn rate_limiting_enabled(&self) -> bool {
        self.rate_limit_max_requests > 0
    }

    /// Check if a request path belongs to the JSON API.
    ///
    /// Matches the prefix itself and anything below it on a segment
    /// boundary, so `/api` and `/api/jobs` match but `/apiary` does not.
    pub fn is_api_path(&self, path: &str) -> bool {
        path.strip_prefix(self.api_prefix.as_str())
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<std::net::SocketAddr> {
        if self.metrics_enabled() {
            Some(std::net::SocketAddr::from((
                [0, 0, 0, 0],
                self.metrics_port,
            )))
        } else {
            None
        }
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> AppResult<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .trim()
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    /// Parse a comma-separated list, dropping empty entries.
    fn parse_list(name: &str) -> Vec<String> {
        env::var(name)
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Default configuration for testing and development.
///
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Server
            host: "0.0.0.0".to_string(),
            port: 3000,
            environment: Environment::Development,
            api_prefix: "/api".to_string(),
            static_dir: None,
            max_request_body_size: 1024 * 1024,
            // CSP
            csp_connect_origins: vec![],
            csp_script_origins: vec![],
            csp_img_allow_remote: false,
            // Rate limiting
            rate_limit_window: Duration::from_secs(60),
            rate_limit_max_requests: 100,
            rate_limit_sweep_interval: Duration::from_secs(60),
            // Client identity
            trust_proxy: false,
            trusted_proxies: vec![],
            // Observability
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            metrics_port: 9090,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = Config::default();

        assert_eq!(config.port, 3000);
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.api_prefix, "/api");
        assert_eq!(config.rate_limit_window, Duration::from_secs(60));
        assert_eq!(config.rate_limit_max_requests, 100);
        assert!(!config.trust_proxy);
    }

    #[test]
    fn test_server_addr_format() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };

        assert_eq!(config.server_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!("production".parse::<Environment>().unwrap(), Environment::Production);
        assert_eq!("PROD".parse::<Environment>().unwrap(), Environment::Production);
        assert_eq!(" dev ".parse::<Environment>().unwrap(), Environment::Development);
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_is_api_path_segment_boundary() {
        let config = Config::default();

        assert!(config.is_api_path("/api"));
        assert!(config.is_api_path("/api/jobs"));
        assert!(config.is_api_path("/api/does-not-exist"));
        assert!(!config.is_api_path("/apiary"));
        assert!(!config.is_api_path("/"));
        assert!(!config.is_api_path("/jobs/api"));
    }

    #[test]
    fn test_rate_limiting_enabled() {
        assert!(Config::default().rate_limiting_enabled());

        let config = Config {
            rate_limit_max_requests: 0,
            ..Config::default()
        };
        assert!(!config.rate_limiting_enabled());
    }

    #[test]
    fn test_validate_zero_window() {
        let config = Config {
            rate_limit_window: Duration::ZERO,
            ..Config::default()
        };

        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("RATE_LIMIT_WINDOW_SECS"));
    }

    #[test]
    fn test_validate_api_prefix() {
        for prefix in ["api", "/", "/api/"] {
            let config = Config {
                api_prefix: prefix.to_string(),
                ..Config::default()
            };
            assert!(config.validate().is_err(), "prefix {prefix:?} should be rejected");
        }
    }

    #[test]
    fn test_validate_proxies_require_explicit_trust() {
        let config = Config {
            trusted_proxies: vec!["10.0.0.0/8".to_string()],
            ..Config::default()
        };
        assert!(config.validate().unwrap_err().to_string().contains("TRUST_PROXY"));

        let config = Config {
            trust_proxy: true,
            trusted_proxies: vec!["10.0.0.0/8".to_string()],
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_metrics_addr_disabled() {
        let config = Config {
            metrics_port: 0,
            ..Config::default()
        };
        assert!(config.metrics_addr().is_none());
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(Config::default().validate().is_ok());
    }
}
