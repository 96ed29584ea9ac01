//! Request rate limiting.
//!
//! Two [`governor`] quotas guard every request: a burst quota allowing
//! `burst_size` requests at once and refilling at `requests_per_minute`,
//! and an hourly quota of `requests_per_hour` replenished evenly across the
//! hour. Both must admit a request.
//!
//! The limiter is global to the engine instance: there are no per-caller
//! buckets. A request refused by the hourly quota has already spent its
//! burst permit.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as GovernorRateLimiter};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::RateLimitConfig;

type DirectLimiter<C> =
    GovernorRateLimiter<NotKeyed, InMemoryState, C, NoOpMiddleware<<C as Clock>::Instant>>;

/// Which limit rejected a request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RateLimitExceeded {
    /// The burst quota is spent.
    #[error("burst limit reached; next permit in {}ms", retry_after.as_millis())]
    Burst {
        /// Time until one permit refills.
        retry_after: Duration,
    },
    /// The hourly quota is spent.
    #[error("hourly limit of {limit} requests reached; next permit in {}s", retry_after.as_secs())]
    Hourly {
        /// Configured hourly cap.
        limit: u32,
        /// Time until one hourly permit refills.
        retry_after: Duration,
    },
}

impl RateLimitExceeded {
    /// Time after which the same request could pass.
    pub fn retry_after(&self) -> Duration {
        match self {
            RateLimitExceeded::Burst { retry_after }
            | RateLimitExceeded::Hourly { retry_after, .. } => *retry_after,
        }
    }
}

/// Burst quota plus hourly quota.
pub struct RateLimiter<C: Clock = DefaultClock> {
    config: RateLimitConfig,
    clock: C,
    burst: Option<DirectLimiter<C>>,
    hourly: Option<DirectLimiter<C>>,
}

impl RateLimiter<DefaultClock> {
    /// Build from config on the wall clock; both quotas start full.
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, DefaultClock::default())
    }
}

impl<C: Clock + Clone> RateLimiter<C> {
    /// Build from config on `clock`.
    ///
    /// A zero rate leaves its quota unenforced; validation rejects such
    /// configs before they reach the engine.
    pub fn with_clock(config: RateLimitConfig, clock: C) -> Self {
        if !config.enabled {
            return Self {
                config,
                clock,
                burst: None,
                hourly: None,
            };
        }

        let burst = match (
            NonZeroU32::new(config.requests_per_minute),
            NonZeroU32::new(config.burst_size),
        ) {
            (Some(rpm), Some(burst)) => Some(GovernorRateLimiter::direct_with_clock(
                Quota::per_minute(rpm).allow_burst(burst),
                clock.clone(),
            )),
            _ => {
                warn!(
                    requests_per_minute = config.requests_per_minute,
                    burst_size = config.burst_size,
                    "rate limit: zero burst quota, not enforced"
                );
                None
            }
        };
        let hourly = match NonZeroU32::new(config.requests_per_hour) {
            Some(rph) => Some(GovernorRateLimiter::direct_with_clock(
                Quota::per_hour(rph),
                clock.clone(),
            )),
            None => {
                warn!("rate limit: zero hourly quota, not enforced");
                None
            }
        };

        Self {
            config,
            clock,
            burst,
            hourly,
        }
    }

    /// Whether limiting is switched on.
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Take one permit from each quota.
    ///
    /// # Errors
    ///
    /// Returns which quota rejected the request. The burst quota is checked
    /// first; a burst rejection takes nothing from the hourly quota.
    pub fn try_acquire(&self) -> Result<(), RateLimitExceeded> {
        if let Some(burst) = &self.burst {
            if let Err(not_until) = burst.check() {
                let retry_after = not_until.wait_time_from(self.clock.now());
                debug!(
                    retry_after_ms = retry_after.as_millis() as u64,
                    "rate limit: burst quota spent"
                );
                return Err(RateLimitExceeded::Burst { retry_after });
            }
        }
        if let Some(hourly) = &self.hourly {
            if let Err(not_until) = hourly.check() {
                let retry_after = not_until.wait_time_from(self.clock.now());
                warn!(
                    limit = self.config.requests_per_hour,
                    retry_after_s = retry_after.as_secs(),
                    "rate limit: hourly quota spent"
                );
                return Err(RateLimitExceeded::Hourly {
                    limit: self.config.requests_per_hour,
                    retry_after,
                });
            }
        }
        Ok(())
    }
}
