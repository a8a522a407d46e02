//! Per-caller rate limiting for the coupon validation endpoint, backed by
//! governor's keyed GCRA limiter.

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::middleware::NoOpMiddleware;
use governor::state::keyed::DashMapStateStore;
use governor::{Quota, RateLimiter};

/// Shrink the keyed state store every N checks so long-running processes do
/// not accumulate state for every caller ever seen.
const SHRINK_INTERVAL: u64 = 1000;

type KeyedLimiter = RateLimiter<String, DashMapStateStore<String>, DefaultClock, NoOpMiddleware>;

/// Keyed rate limiter: `max_requests` per `window` per caller key.
#[derive(Clone)]
pub struct CallerRateLimiter {
    limiter: Arc<KeyedLimiter>,
    check_count: Arc<AtomicU64>,
}

impl CallerRateLimiter {
    /// Panics if `max_requests` is zero or `window` is zero; both are
    /// compile-time constants at call sites.
    #[must_use]
    pub fn new(max_requests: u32, window: Duration) -> Self {
        let burst = NonZeroU32::new(max_requests).expect("max_requests must be positive");
        let quota = Quota::with_period(window.div_f64(f64::from(max_requests.max(1))))
            .expect("window must be positive")
            .allow_burst(burst);
        Self {
            limiter: Arc::new(RateLimiter::keyed(quota)),
            check_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Check one request for `key`. `Err(retry_after_secs)` when over limit.
    pub fn check(&self, key: &str) -> Result<(), u64> {
        let count = self.check_count.fetch_add(1, Ordering::Relaxed);
        if count > 0 && count % SHRINK_INTERVAL == 0 {
            self.limiter.retain_recent();
        }

        match self.limiter.check_key(&key.to_string()) {
            Ok(()) => Ok(()),
            Err(not_until) => {
                let wait = not_until.wait_time_from(DefaultClock::default().now());
                Err(wait.as_secs().max(1))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_allowed_then_limited() {
        let limiter = CallerRateLimiter::new(10, Duration::from_secs(900));
        for i in 0..10 {
            assert!(limiter.check("1.2.3.4").is_ok(), "request {i} should pass");
        }
        let retry = limiter.check("1.2.3.4").unwrap_err();
        assert!(retry >= 1);
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = CallerRateLimiter::new(2, Duration::from_secs(900));
        assert!(limiter.check("a").is_ok());
        assert!(limiter.check("a").is_ok());
        assert!(limiter.check("a").is_err());
        assert!(limiter.check("b").is_ok());
    }
}
