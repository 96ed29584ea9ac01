//! # llm-cost-engine
//!
//! Cost-optimisation middleware for LLM requests, sitting between an
//! application and its model providers.
//!
//! ## Architecture
//!
//! Every request flows through the cheapest checks first:
//! ```text
//! CostRequestContext → Dedup → ExactCache → SemanticCache → RateLimit
//!     → Budget admission → Classify(priority, complexity, time)
//!     → Dispatch → [Upstream + retry/fallback] → Cache → Usage → Metric
//! ```
//!
//! ## Modules
//!
//! | Module | Role |
//! |--------|------|
//! | [`config`] | Ten JSON policy documents, loading, validation, hot reload |
//! | [`cache`] | Exact cache, semantic cache, in-flight coalescing, bypass rules |
//! | [`routing`] | Complexity, priority, and time-of-day classification |
//! | [`budget`] | Token accounting, admission, alerts |
//! | [`metrics`] | Prometheus counters, per-request records, rollups, JSONL sink |
//! | [`resilience`] | Rate limiting, retry, fallback chains |
//! | [`upstream`] | Provider abstraction |
//! | [`middleware`] | The [`CostEngine`] tying it all together |

// ── Lint policy ───────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![warn(missing_docs)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub mod budget;
pub mod cache;
pub mod config;
pub mod metrics;
pub mod middleware;
pub mod resilience;
pub mod routing;
pub mod types;
pub mod upstream;

// Re-exports for convenience
pub use config::{ConfigError, ConfigLoader, CostOptimizationConfig};
pub use middleware::{
    CacheHit, CacheSource, CostEngine, CostEngineBuilder, Dispatch, EngineError, EngineResponse,
    Rejection, ResponseSource, RoutingDecision,
};
pub use types::{
    AlertLevel, CachedResponse, ComplexityLevel, CostRequestContext, PriorityTier, TokenUsage,
};
pub use upstream::{EchoUpstream, Upstream, UpstreamError, UpstreamRequest, UpstreamResponse};

/// Initialise the global tracing subscriber.
///
/// Reads the `LOG_FORMAT` environment variable to choose output format:
/// - `"json"`: structured JSON output for log aggregators
/// - anything else (including unset): human-readable pretty output
///
/// Filter level is controlled by `RUST_LOG` (e.g. `RUST_LOG=info`).
///
/// # Errors
///
/// Returns [`CostEngineError::Other`] if the global subscriber has already
/// been set (e.g. by a previous call or a test harness).
///
/// # Panics
///
/// This function never panics.
///
/// # Example
///
/// ```no_run
/// # use llm_cost_engine::{init_tracing, CostEngineError};
/// # fn example() -> Result<(), CostEngineError> {
/// init_tracing()?;
/// # Ok(()) }
/// ```
pub fn init_tracing() -> Result<(), CostEngineError> {
    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let result = match format.as_str() {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .with_current_span(true)
            .with_span_list(true)
            .try_init(),
        _ => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init(),
    };

    result.map_err(|e| CostEngineError::Other(format!("tracing init failed: {e}")))
}

/// Top-level crate errors.
///
/// Request-path failures are [`EngineError`]; this type covers setup.
#[derive(Error, Debug)]
pub enum CostEngineError {
    /// A policy document could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Filesystem error outside config loading.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all for errors that do not fit a specific variant.
    #[error("{0}")]
    Other(String),
}
