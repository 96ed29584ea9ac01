//! Model fallback chains.
//!
//! When the chosen model keeps failing, the chain keyed by that model (or
//! `"default"`) names who to ask next. Every attempt, retries included, is
//! bounded by the configured timeout.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

use super::retry::RetryPolicy;
use crate::config::FallbackChainConfig;
use crate::upstream::UpstreamError;

/// Chain key consulted when a model has no chain of its own.
pub const DEFAULT_CHAIN: &str = "default";

/// Fallback chains built from `fallback-chain.json`.
#[derive(Debug, Clone)]
pub struct FallbackChain {
    chains: BTreeMap<String, Vec<String>>,
    timeout: Duration,
}

impl FallbackChain {
    /// Build from config.
    pub fn new(config: &FallbackChainConfig) -> Self {
        Self {
            chains: config.chains.clone(),
            timeout: Duration::from_millis(config.timeout),
        }
    }

    /// Per-attempt timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// `model` followed by its fallbacks, without repeats.
    pub fn models_for(&self, model: &str) -> Vec<String> {
        let chain = self
            .chains
            .get(model)
            .or_else(|| self.chains.get(DEFAULT_CHAIN))
            .map(Vec::as_slice)
            .unwrap_or_default();

        let mut models = vec![model.to_string()];
        for candidate in chain {
            if !models.contains(candidate) {
                models.push(candidate.clone());
            }
        }
        models
    }

    /// Try each model of the chain in turn, retrying per `retry`.
    ///
    /// Returns the first success together with the model that produced it.
    ///
    /// # Errors
    ///
    /// Returns the last model's final error once the chain is exhausted.
    pub async fn run<F, Fut, T>(
        &self,
        model: &str,
        retry: &RetryPolicy,
        mut op: F,
    ) -> Result<(T, String), UpstreamError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let models = self.models_for(model);
        let mut last_error = None;

        for candidate in models {
            let timeout = self.timeout;
            let attempt = retry
                .run(|_| {
                    let call = op(candidate.clone());
                    let name = candidate.clone();
                    async move {
                        tokio::time::timeout(timeout, call)
                            .await
                            .unwrap_or_else(|_| Err(UpstreamError::timeout(&name, timeout)))
                    }
                })
                .await;

            match attempt {
                Ok(value) => return Ok((value, candidate)),
                Err(e) => {
                    warn!(model = %candidate, code = %e.code, "fallback: model exhausted");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            UpstreamError::new("NO_MODEL", format!("no model available for {model}"))
        }))
    }
}

impl Default for FallbackChain {
    fn default() -> Self {
        Self::new(&FallbackChainConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> FallbackChain {
        let mut chains = BTreeMap::new();
        chains.insert(
            "claude-opus-4".to_string(),
            vec!["claude-sonnet-4".to_string(), "claude-opus-4".to_string()],
        );
        chains.insert(DEFAULT_CHAIN.to_string(), vec!["gpt-4o-mini".to_string()]);
        FallbackChain::new(&FallbackChainConfig {
            chains,
            timeout: 1_000,
        })
    }

    #[test]
    fn test_models_for_uses_own_chain_without_repeats() {
        assert_eq!(
            chain().models_for("claude-opus-4"),
            vec!["claude-opus-4", "claude-sonnet-4"]
        );
    }

    #[test]
    fn test_models_for_falls_back_to_default_chain() {
        assert_eq!(chain().models_for("other"), vec!["other", "gpt-4o-mini"]);
    }

    #[test]
    fn test_models_for_without_chains_is_just_the_model() {
        let empty = FallbackChain::new(&FallbackChainConfig {
            chains: BTreeMap::new(),
            timeout: 10,
        });
        assert_eq!(empty.models_for("m"), vec!["m"]);
    }

    #[tokio::test]
    async fn test_run_moves_to_next_model_on_failure() {
        let result = chain()
            .run("claude-opus-4", &RetryPolicy::none(), |model| async move {
                if model == "claude-opus-4" {
                    Err(UpstreamError::new("OVERLOADED", "no capacity"))
                } else {
                    Ok(model.len())
                }
            })
            .await
            .expect("test: fallback succeeds");
        assert_eq!(result.1, "claude-sonnet-4");
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_times_out_slow_attempts() {
        let result: Result<((), String), _> = chain()
            .run("other", &RetryPolicy::none(), |_| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        let err = result.expect_err("test: every attempt times out");
        assert_eq!(err.code, UpstreamError::TIMEOUT);
    }
}
