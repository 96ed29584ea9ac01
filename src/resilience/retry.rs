//! Exponential backoff for transient upstream failures.
//!
//! ## Usage
//!
//! ```rust
//! use llm_cost_engine::config::RetryPolicyConfig;
//! use llm_cost_engine::resilience::RetryPolicy;
//!
//! let policy = RetryPolicy::new(&RetryPolicyConfig::default());
//! assert_eq!(policy.max_retries(), 3);
//! ```

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::RetryPolicyConfig;
use crate::upstream::UpstreamError;

/// Retry policy built from `retry-policy.json`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    retryable: HashSet<String>,
}

impl RetryPolicy {
    /// Build from config.
    pub fn new(config: &RetryPolicyConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            retryable: config.retryable_errors.iter().cloned().collect(),
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            retryable: HashSet::new(),
        }
    }

    /// Retries allowed after the first attempt.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Whether an error with this code is worth another attempt.
    pub fn is_retryable(&self, error: &UpstreamError) -> bool {
        self.retryable.contains(&error.code)
    }

    /// Delay before retry number `attempt` (0-based):
    /// `min(base * 2^attempt, max)`.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails with a non-retryable code, or the
    /// retries are spent. `op` receives the 0-based attempt number.
    ///
    /// # Errors
    ///
    /// Returns the last error seen.
    pub async fn run<F, Fut, T>(&self, mut op: F) -> Result<T, UpstreamError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(attempt, "retry: succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(e) if attempt < self.max_retries && self.is_retryable(&e) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        attempt,
                        max = self.max_retries,
                        code = %e.code,
                        delay_ms = delay.as_millis() as u64,
                        "retry: transient failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&RetryPolicyConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(&RetryPolicyConfig {
            max_retries,
            base_delay_ms: 100,
            max_delay_ms: 350,
            retryable_errors: vec!["SERVICE_UNAVAILABLE".into()],
        })
    }

    #[test]
    fn test_delay_doubles_then_caps() {
        let p = policy(5);
        assert_eq!(p.delay_for(0), Duration::from_millis(100));
        assert_eq!(p.delay_for(1), Duration::from_millis(200));
        assert_eq!(p.delay_for(2), Duration::from_millis(350));
        assert_eq!(p.delay_for(40), Duration::from_millis(350));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_retries_retryable_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = policy(3)
            .run(move |_| {
                let c = Arc::clone(&c);
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(UpstreamError::new("SERVICE_UNAVAILABLE", "busy"))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;
        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result: Result<(), _> = policy(2)
            .run(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
                async { Err(UpstreamError::new("SERVICE_UNAVAILABLE", "busy")) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_does_not_retry_unknown_codes() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result: Result<(), _> = policy(5)
            .run(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
                async { Err(UpstreamError::new("INVALID_REQUEST", "bad")) }
            })
            .await;
        assert_eq!(result.map_err(|e| e.code), Err("INVALID_REQUEST".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
