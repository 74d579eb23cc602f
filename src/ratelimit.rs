//! Keyed rate limiting for authentication traffic.
//!
//! Each limiter owns one `(points, window)` policy and tracks an
//! independent counter per key (normally an IP address). Exceeding the
//! policy yields [`crate::AuthError::RateLimited`] with the remaining
//! block duration. Counter state is periodically shrunk so memory
//! stays bounded; counters are in-process and ephemeral: losing them
//! on restart degrades to "no limiting", never to a lockout.
//!
//! # Tracing Events
//!
//! - `auth.ratelimit.blocked` - A key exceeded its policy

use crate::error::{AuthError, Result};
use governor::{
    clock::DefaultClock, middleware::NoOpMiddleware, state::keyed::DashMapStateStore, Quota,
    RateLimiter,
};
use std::{
    num::NonZeroU32,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

/// Shrink the state store every N requests to prevent unbounded growth.
const SHRINK_INTERVAL: u64 = 1000;

/// A `(points, window)` rate-limit policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Calls admitted per window.
    pub points: u32,
    /// Window length.
    pub window: Duration,
}

impl RateLimitPolicy {
    #[must_use]
    pub fn new(points: u32, window: Duration) -> Self {
        Self {
            points: points.max(1),
            window,
        }
    }

    /// Login attempts: 5 per 15 minutes per IP.
    #[must_use]
    pub fn login() -> Self {
        Self::new(5, Duration::from_secs(15 * 60))
    }

    /// Password-reset requests: 3 per hour per IP.
    #[must_use]
    pub fn password_reset() -> Self {
        Self::new(3, Duration::from_secs(60 * 60))
    }

    /// Request-gate failures: 100 per 15 minutes per IP. Generous
    /// because it only counts failed gate checks, not traffic.
    #[must_use]
    pub fn request_gate() -> Self {
        Self::new(100, Duration::from_secs(15 * 60))
    }
}

type KeyedLimiter = RateLimiter<String, DashMapStateStore<String>, DefaultClock, NoOpMiddleware>;

/// Per-key sliding-window limiter for one policy.
#[derive(Clone)]
pub struct KeyedRateLimiter {
    limiter: Arc<KeyedLimiter>,
    policy: RateLimitPolicy,
    request_count: Arc<AtomicU64>,
}

impl KeyedRateLimiter {
    /// Build a limiter for the given policy.
    ///
    /// # Panics
    ///
    /// Panics if the policy window is zero; policies are static
    /// configuration, so this is a programming error, not input.
    #[must_use]
    pub fn new(policy: RateLimitPolicy) -> Self {
        let points = NonZeroU32::new(policy.points).expect("points clamped to >= 1");
        let quota = Quota::with_period(policy.window)
            .expect("rate-limit window must be non-zero")
            .allow_burst(points);

        Self {
            limiter: Arc::new(RateLimiter::keyed(quota)),
            policy,
            request_count: Arc::new(AtomicU64::new(0)),
        }
    }

    #[must_use]
    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Consume one point for `key`.
    pub fn consume(&self, key: &str) -> Result<()> {
        self.consume_n(key, 1)
    }

    /// Consume `cost` points for `key` at once.
    pub fn consume_n(&self, key: &str, cost: u32) -> Result<()> {
        self.maybe_shrink();

        let Some(cost) = NonZeroU32::new(cost) else {
            return Ok(());
        };
        if cost.get() > self.policy.points {
            // Can never be satisfied; block for a full window.
            return Err(self.blocked(key, self.policy.window.as_secs().max(1)));
        }

        match self.limiter.check_key_n(&key.to_string(), cost) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(not_until)) => {
                let wait = not_until
                    .wait_time_from(governor::clock::Clock::now(&DefaultClock::default()));
                Err(self.blocked(key, wait.as_secs().max(1)))
            }
            Err(_) => Err(self.blocked(key, self.policy.window.as_secs().max(1))),
        }
    }

    fn blocked(&self, key: &str, retry_after_secs: u64) -> AuthError {
        tracing::warn!(
            target: "auth.ratelimit.blocked",
            key = %key,
            retry_after_secs = retry_after_secs,
            points = self.policy.points,
            window_secs = self.policy.window.as_secs(),
            "Rate limit exceeded"
        );
        AuthError::rate_limited(retry_after_secs)
    }

    fn maybe_shrink(&self) {
        let count = self.request_count.fetch_add(1, Ordering::Relaxed);
        if count % SHRINK_INTERVAL == 0 && count > 0 {
            self.limiter.retain_recent();
        }
    }
}
