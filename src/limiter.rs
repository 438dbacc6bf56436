//! Fixed-window request counting per client.
//!
//! # Algorithm
//!
//! Each client key owns one [`ClientRateRecord`] holding a request count and
//! the instant its window opened:
//!
//! 1. No record: create it with `count = 1`, allow.
//! 2. Window elapsed (`now - window_start > window`): reset to `count = 1`, allow.
//! 3. Inside the window and `count < max_requests`: increment, allow.
//! 4. Inside the window and `count >= max_requests`: reject without incrementing.
//!
//! With the default 100 requests / 60 seconds, the 101st request inside a
//! window is the first one rejected.
//!
//! # Concurrency
//!
//! Records live in a sharded `DashMap`. The read-modify-write for a key runs
//! under that key's shard lock, so parallel requests from one client never
//! lose increments and concurrent inserts cannot corrupt the map.
//!
//! # Memory
//!
//! Expired records are semantically absent but stay in the map until
//! [`ClientRateLimiter::sweep_expired`] runs; the application state drives a
//! periodic sweep so memory tracks recently active clients only.

use std::fmt;
use std::num::NonZeroU32;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use governor::clock::{Clock, DefaultClock, Reference};

/// Error type for limiter construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitError {
    /// Threshold cannot be zero.
    ZeroRequests,
    /// Window cannot be zero-length.
    ZeroWindow,
}

impl fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitError::ZeroRequests => write!(
                f,
                "max requests must be greater than 0; disable rate limiting instead"
            ),
            RateLimitError::ZeroWindow => write!(f, "rate limit window must be greater than 0"),
        }
    }
}

impl std::error::Error for RateLimitError {}

/// Per-client counter for the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientRateRecord<I> {
    /// Requests counted in this window, always >= 1.
    pub count: u32,
    /// When the window opened.
    pub window_start: I,
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allow {
        /// Requests left in the current window.
        remaining: u32,
    },
    Reject {
        /// Time until the client's window resets.
        retry_after: Duration,
    },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allow { .. })
    }
}

/// Rate limiter as seen by the request path and the background sweep.
///
/// Implemented by [`FixedWindowLimiter`] for any clock, so the middleware and
/// application state can hold it as a trait object.
pub trait ClientRateLimiter: Send + Sync {
    /// Count a request from `client_key` and decide whether it may proceed.
    fn check(&self, client_key: &str) -> RateDecision;

    /// Drop records whose window has elapsed. Returns how many were removed.
    fn sweep_expired(&self) -> usize;

    /// Number of client records currently held.
    fn tracked_clients(&self) -> usize;

    /// Requests allowed per window.
    fn limit(&self) -> u32;

    /// Window length.
    fn window(&self) -> Duration;
}

/// Fixed-window limiter keyed by client identity.
///
/// Generic over a `governor` clock so tests can drive time with
/// `FakeRelativeClock`.
///
/// # Example
///
/// ```rust,ignore
/// let limiter = FixedWindowLimiter::new(100, Duration::from_secs(60))?;
/// if !limiter.check("10.0.0.5").is_allowed() {
///     // respond 429
/// }
/// ```
pub struct FixedWindowLimiter<C: Clock = DefaultClock> {
    records: DashMap<String, ClientRateRecord<C::Instant>>,
    max_requests: NonZeroU32,
    window: Duration,
    clock: C,
}

impl FixedWindowLimiter<DefaultClock> {
    /// Create a limiter on the monotonic default clock.
    ///
    /// # Errors
    ///
    /// Returns `RateLimitError` if `max_requests` or `window` is zero.
    pub fn new(max_requests: u32, window: Duration) -> Result<Self, RateLimitError> {
        Self::with_clock(max_requests, window, DefaultClock::default())
    }
}

impl<C: Clock> FixedWindowLimiter<C> {
    /// Create a limiter reading time from `clock`.
    ///
    /// # Errors
    ///
    /// Returns `RateLimitError` if `max_requests` or `window` is zero.
    pub fn with_clock(max_requests: u32, window: Duration, clock: C) -> Result<Self, RateLimitError> {
        let max_requests = NonZeroU32::new(max_requests).ok_or(RateLimitError::ZeroRequests)?;
        if window.is_zero() {
            return Err(RateLimitError::ZeroWindow);
        }

        Ok(Self {
            records: DashMap::new(),
            max_requests,
            window,
            clock,
        })
    }

    /// Current record for a client, if one is held (expired or not).
    pub fn record(&self, client_key: &str) -> Option<ClientRateRecord<C::Instant>> {
        self.records.get(client_key).map(|r| *r)
    }

    fn elapsed(start: C::Instant, now: C::Instant) -> Duration {
        Duration::from(now.duration_since(start))
    }

    fn fresh_record(&self, now: C::Instant) -> (ClientRateRecord<C::Instant>, RateDecision) {
        (
            ClientRateRecord {
                count: 1,
                window_start: now,
            },
            RateDecision::Allow {
                remaining: self.max_requests.get() - 1,
            },
        )
    }

    /// Apply one request to an existing record.
    fn advance(&self, record: &mut ClientRateRecord<C::Instant>, now: C::Instant) -> RateDecision {
        let elapsed = Self::elapsed(record.window_start, now);

        if elapsed > self.window {
            let (fresh, decision) = self.fresh_record(now);
            *record = fresh;
            return decision;
        }

        if record.count >= self.max_requests.get() {
            return RateDecision::Reject {
                retry_after: self.window.saturating_sub(elapsed),
            };
        }

        record.count += 1;
        RateDecision::Allow {
            remaining: self.max_requests.get() - record.count,
        }
    }
}

impl<C> ClientRateLimiter for FixedWindowLimiter<C>
where
    C: Clock + Send + Sync,
    C::Instant: Send + Sync,
{
    fn check(&self, client_key: &str) -> RateDecision {
        let now = self.clock.now();

        // Known clients are updated in place without allocating a key
        if let Some(mut record) = self.records.get_mut(client_key) {
            return self.advance(&mut record, now);
        }

        match self.records.entry(client_key.to_string()) {
            // Another request for the same client inserted in between
            Entry::Occupied(mut entry) => self.advance(entry.get_mut(), now),
            Entry::Vacant(entry) => {
                let (record, decision) = self.fresh_record(now);
                entry.insert(record);
                decision
            }
        }
    }

    fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.records.len();
        self.records
            .retain(|_, record| Self::elapsed(record.window_start, now) <= self.window);
        before.saturating_sub(self.records.len())
    }

    fn tracked_clients(&self) -> usize {
        self.records.len()
    }

    fn limit(&self) -> u32 {
        self.max_requests.get()
    }

    fn window(&self) -> Duration {
        self.window
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::Arc;

    use governor::clock::FakeRelativeClock;

    use super::*;

    const WINDOW: Duration = Duration::from_secs(60);

    fn limiter(max: u32) -> (FixedWindowLimiter<FakeRelativeClock>, FakeRelativeClock) {
        let clock = FakeRelativeClock::default();
        let limiter = FixedWindowLimiter::with_clock(max, WINDOW, clock.clone()).unwrap();
        (limiter, clock)
    }

    #[test]
    fn test_zero_requests_rejected() {
        let result = FixedWindowLimiter::new(0, WINDOW);
        assert!(matches!(result, Err(RateLimitError::ZeroRequests)));
    }

    #[test]
    fn test_zero_window_rejected() {
        let result = FixedWindowLimiter::new(10, Duration::ZERO);
        assert!(matches!(result, Err(RateLimitError::ZeroWindow)));
    }

    #[test]
    fn test_first_request_creates_record() {
        let (limiter, _clock) = limiter(100);

        assert_eq!(limiter.check("a"), RateDecision::Allow { remaining: 99 });
        assert_eq!(limiter.record("a").unwrap().count, 1);
    }

    #[test]
    fn test_101st_request_in_window_rejected() {
        let (limiter, clock) = limiter(100);

        for _ in 0..100 {
            assert!(limiter.check("10.0.0.5").is_allowed());
            clock.advance(Duration::from_millis(100));
        }

        let decision = limiter.check("10.0.0.5");
        assert!(!decision.is_allowed());
        // Rejections do not keep counting
        assert_eq!(limiter.record("10.0.0.5").unwrap().count, 100);
    }

    #[test]
    fn test_retry_after_counts_down_to_window_end() {
        let (limiter, clock) = limiter(1);

        assert!(limiter.check("a").is_allowed());
        clock.advance(Duration::from_secs(15));

        assert_eq!(
            limiter.check("a"),
            RateDecision::Reject {
                retry_after: Duration::from_secs(45)
            }
        );
    }

    #[test]
    fn test_window_boundary_is_inclusive() {
        let (limiter, clock) = limiter(1);

        assert!(limiter.check("a").is_allowed());
        clock.advance(WINDOW);
        // Exactly one window later the record is still valid
        assert!(!limiter.check("a").is_allowed());

        clock.advance(Duration::from_millis(1));
        assert!(limiter.check("a").is_allowed());
    }

    #[test]
    fn test_window_reset_after_exceeding_threshold() {
        let (limiter, clock) = limiter(3);

        for _ in 0..3 {
            assert!(limiter.check("a").is_allowed());
        }
        for _ in 0..5 {
            assert!(!limiter.check("a").is_allowed());
        }

        clock.advance(Duration::from_secs(61));
        assert_eq!(limiter.check("a"), RateDecision::Allow { remaining: 2 });

        let record = limiter.record("a").unwrap();
        assert_eq!(record.count, 1);
        assert_eq!(record.window_start, clock.now());
    }

    #[test]
    fn test_clients_are_isolated() {
        let (limiter, _clock) = limiter(2);

        assert!(limiter.check("client-a").is_allowed());
        assert!(limiter.check("client-a").is_allowed());
        assert!(!limiter.check("client-a").is_allowed());

        assert_eq!(limiter.check("client-b"), RateDecision::Allow { remaining: 1 });
    }

    #[test]
    fn test_sweep_removes_only_expired_records() {
        let (limiter, clock) = limiter(10);

        limiter.check("old");
        clock.advance(Duration::from_secs(50));
        limiter.check("recent");
        clock.advance(Duration::from_secs(20));

        assert_eq!(limiter.sweep_expired(), 1);
        assert_eq!(limiter.tracked_clients(), 1);
        assert!(limiter.record("old").is_none());
        assert!(limiter.record("recent").is_some());
    }

    #[test]
    fn test_concurrent_checks_do_not_lose_increments() {
        let (limiter, _clock) = limiter(100);
        let limiter = Arc::new(limiter);

        let allowed: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let limiter = limiter.clone();
                    scope.spawn(move || {
                        (0..50)
                            .filter(|_| limiter.check("shared").is_allowed())
                            .count()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(allowed, 100);
        assert_eq!(limiter.record("shared").unwrap().count, 100);
    }
}
