//! # Upstream Resilience
//!
//! ## Responsibility
//! Shape how the engine calls models: [`RateLimiter`] throttles inbound
//! requests, [`RetryPolicy`] retries transient failures with exponential
//! backoff, and [`FallbackChain`] moves on to the next model when one is
//! exhausted.
//!
//! ## Guarantees
//! - Only error codes listed in `retryable_errors` are retried
//! - Every upstream attempt is bounded by the fallback timeout
//! - A disabled rate limiter admits everything
//!
//! ## NOT Responsible For
//! - Budget admission (see `budget`)
//! - Circuit breaking across engine instances

pub mod fallback;
pub mod rate_limit;
pub mod retry;

pub use fallback::{FallbackChain, DEFAULT_CHAIN};
pub use rate_limit::{RateLimitExceeded, RateLimiter};
pub use retry::RetryPolicy;
