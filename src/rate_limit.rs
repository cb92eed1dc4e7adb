// src/rate_limit.rs

use governor::clock::{Clock, DefaultClock};
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::time::Duration;

type KeyedLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Admission-control settings for the quote surface.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Sliding window length.
    pub window: Duration,
    /// Requests admitted per window per identity, also the burst ceiling.
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            burst: 120,
        }
    }
}

/// Per-identity sliding-window rate limiter for the quote operation.
///
/// One limiter cell per caller identity (the caller-provided identity token,
/// defaulting to the network peer at the transport layer). A denial carries a
/// retry hint equal to the remaining window time; denials are not failures as
/// far as circuit breakers are concerned.
pub struct QuoteRateLimiter {
    limiter: KeyedLimiter,
    clock: DefaultClock,
}

impl QuoteRateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let burst = NonZeroU32::new(config.burst.max(1)).expect("burst clamped to >= 1");
        let replenish = (config.window / config.burst.max(1)).max(Duration::from_millis(1));
        let quota = Quota::with_period(replenish)
            .expect("non-zero replenish period")
            .allow_burst(burst);
        Self {
            limiter: RateLimiter::keyed(quota),
            clock: DefaultClock::default(),
        }
    }

    /// Admit or deny one request for `identity`. On denial returns the time
    /// the caller should wait before retrying.
    pub fn check(&self, identity: &str) -> Result<(), Duration> {
        match self.limiter.check_key(&identity.to_string()) {
            Ok(_) => Ok(()),
            Err(not_until) => Err(not_until.wait_time_from(self.clock.now())),
        }
    }

    /// Drop limiter state for identities that have fully replenished. Called
    /// opportunistically; the store grows with distinct identities otherwise.
    pub fn retain_recent(&self) {
        self.limiter.retain_recent();
    }
}
