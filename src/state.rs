//! Shared application state for the defense pipeline.
//!
//! Holds everything the middleware needs, built once at startup:
//!
//! - **Configuration**: Runtime configuration access
//! - **Security Headers**: CSP policy and static header set
//! - **Scanner**: Compiled injection rules
//! - **Rate Limiter**: Per-client fixed-window counters (if enabled)
//! - **Trusted Proxies**: Which peers may supply forwarded client addresses
//!
//! # Structured Concurrency
//!
//! The rate limiter sweep runs as a background task managed with
//! `tokio_util::task::TaskTracker` and `CancellationToken`. Call `shutdown()`
//! to stop it before application exit.

use std::sync::Arc;
use std::time::Instant;

use governor::clock::{Clock, DefaultClock};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace};

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::limiter::{ClientRateLimiter, FixedWindowLimiter};
use crate::metrics;
use crate::middleware::{SecurityHeaders, TrustedProxyConfig};
use crate::scanner::InjectionScanner;

/// Shared application state for middleware and handlers.
///
/// Cloned per request; all internal data is wrapped in `Arc`.
///
/// # Lifecycle
///
/// Must be created inside a Tokio runtime when rate limiting is enabled,
/// since the sweep task is spawned immediately:
///
/// ```rust,ignore
/// let state = AppState::new(config)?;
/// // ... serve ...
/// state.shutdown().await;
/// ```
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// CSP policy and static security headers
    pub security_headers: Arc<SecurityHeaders>,
    /// Compiled injection rules
    pub scanner: Arc<InjectionScanner>,
    /// Per-client limiter, `None` when `RATE_LIMIT_MAX_REQUESTS=0`
    pub rate_limiter: Option<Arc<dyn ClientRateLimiter>>,
    /// Forwarded-header trust decisions
    pub trusted_proxies: Arc<TrustedProxyConfig>,
    /// Timestamp when the application started
    pub started_at: Instant,
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl AppState {
    /// Create state on the monotonic default clock.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if the configuration is invalid or a
    /// component cannot be built from it.
    pub fn new(config: Config) -> AppResult<Self> {
        Self::with_clock(config, DefaultClock::default())
    }

    /// Create state whose rate limiter reads time from `clock`.
    ///
    /// Tests pass a `governor::clock::FakeRelativeClock` to move windows
    /// forward without sleeping.
    ///
    /// # Errors
    ///
    /// Same as [`AppState::new`].
    pub fn with_clock<C>(config: Config, clock: C) -> AppResult<Self>
    where
        C: Clock + Send + Sync + 'static,
        C::Instant: Send + Sync + 'static,
    {
        config.validate()?;

        let security_headers = SecurityHeaders::from_config(&config)?;
        let scanner = InjectionScanner::new()
            .map_err(|e| AppError::ConfigError(format!("Invalid injection rule: {e}")))?;
        let trusted_proxies = TrustedProxyConfig::new(config.trust_proxy, &config.trusted_proxies);

        let rate_limiter: Option<Arc<dyn ClientRateLimiter>> = if config.rate_limiting_enabled() {
            let limiter = FixedWindowLimiter::with_clock(
                config.rate_limit_max_requests,
                config.rate_limit_window,
                clock,
            )
            .map_err(|e| AppError::ConfigError(e.to_string()))?;
            info!(
                max_requests = config.rate_limit_max_requests,
                window_secs = config.rate_limit_window.as_secs(),
                "Rate limiting enabled"
            );
            Some(Arc::new(limiter))
        } else {
            info!("Rate limiting disabled");
            None
        };

        let state = Self {
            config: Arc::new(config),
            security_headers: Arc::new(security_headers),
            scanner: Arc::new(scanner),
            rate_limiter,
            trusted_proxies: Arc::new(trusted_proxies),
            started_at: Instant::now(),
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        };

        state.spawn_sweep_task();

        Ok(state)
    }

    /// Spawn the periodic eviction of expired rate limit records.
    fn spawn_sweep_task(&self) {
        let Some(limiter) = self.rate_limiter.clone() else {
            return;
        };
        let period = self.config.rate_limit_sweep_interval;
        let cancel = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            let mut ticker = interval(period);
            ticker.tick().await; // Skip the first immediate tick

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        debug!("Rate limit sweep task received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        let removed = limiter.sweep_expired();
                        let tracked = limiter.tracked_clients();
                        metrics::set_tracked_clients(tracked);
                        trace!(removed, tracked, "Swept expired rate limit records");
                    }
                }
            }

            debug!("Rate limit sweep task shutting down");
        });
    }

    /// Gracefully shutdown all background tasks.
    ///
    /// Signals cancellation, closes the tracker and waits for tasks to finish.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of background tasks");

        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        info!("All background tasks have completed");
    }

    /// Get the application uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
