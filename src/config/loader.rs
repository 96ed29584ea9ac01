//! Policy directory loading.
//!
//! ## Responsibility
//! Read the ten JSON documents from a directory, validate each one on its
//! own, and assemble a [`CostOptimizationConfig`] snapshot. A document that
//! is missing, malformed, or invalid is replaced by a fallback (its literal
//! default on first load, the previous snapshot's copy on reload) and the
//! failure is logged. Loading never fails as a whole.
//!
//! ## Guarantees
//! - One bad document never affects the other nine
//! - Every substitution is logged at `warn` and reported in [`LoadReport`]
//! - The file path is included in every error message
//!
//! ## NOT Responsible For
//! - Watching the directory (that belongs to `watcher`)
//! - Defining the documents (that belongs to `mod.rs`)

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;

use super::validation::{ConfigError, Validate};
use super::{
    BudgetAlertConfig, CachePolicyConfig, ComplexityRouterConfig, ConfigDocument,
    CostOptimizationConfig, FallbackChainConfig, ModelCostConfig, PriorityTierConfig,
    RateLimitConfig, RetryPolicyConfig, TimeBasedRoutingConfig, TokenBudgetConfig,
};

/// Result of loading a directory: the snapshot plus every substitution.
#[derive(Debug)]
pub struct LoadReport {
    /// The assembled snapshot.
    pub config: CostOptimizationConfig,
    /// Documents that could not be used, with the reason.
    pub substituted: Vec<(ConfigDocument, ConfigError)>,
}

impl LoadReport {
    /// Whether every document loaded from disk.
    pub fn is_clean(&self) -> bool {
        self.substituted.is_empty()
    }
}

/// Parse and validate one document from a JSON string.
///
/// # Errors
///
/// - `Err(ConfigError::Parse)` if the JSON is malformed or mistyped.
/// - `Err(ConfigError::Validation)` if semantic constraints are violated.
///
/// # Panics
///
/// This function never panics.
pub fn load_from_str<T>(content: &str, source_name: &str) -> Result<T, ConfigError>
where
    T: DeserializeOwned + Validate,
{
    let doc: T = serde_json::from_str(content).map_err(|e| ConfigError::Parse {
        file: source_name.to_string(),
        source: e,
    })?;

    doc.validate().map_err(|errors| {
        ConfigError::Validation(
            errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("\n"),
        )
    })?;

    Ok(doc)
}

/// Read, parse, and validate one document file.
///
/// # Errors
///
/// - `Err(ConfigError::Io)` if the file cannot be read.
/// - Otherwise as [`load_from_str`].
///
/// # Panics
///
/// This function never panics.
pub fn load_from_file<T>(path: &Path) -> Result<T, ConfigError>
where
    T: DeserializeOwned + Validate,
{
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        file: path.display().to_string(),
        source: e,
    })?;

    load_from_str(&content, &path.display().to_string())
}

/// Load every document in `dir`, falling back to `base` per document.
///
/// # Panics
///
/// This function never panics.
pub fn load_dir_over(dir: &Path, base: &CostOptimizationConfig) -> LoadReport {
    let mut config = base.clone();
    let mut substituted = Vec::new();

    for doc in ConfigDocument::ALL {
        let path = dir.join(doc.file_name());
        let outcome = match doc {
            ConfigDocument::ComplexityRouter => load_from_file::<ComplexityRouterConfig>(&path)
                .map(|d| config.complexity_router = d),
            ConfigDocument::TokenBudget => {
                load_from_file::<TokenBudgetConfig>(&path).map(|d| config.token_budget = d)
            }
            ConfigDocument::CachePolicy => {
                load_from_file::<CachePolicyConfig>(&path).map(|d| config.cache_policy = d)
            }
            ConfigDocument::TimeBasedRouting => load_from_file::<TimeBasedRoutingConfig>(&path)
                .map(|d| config.time_based_routing = d),
            ConfigDocument::PriorityTiers => {
                load_from_file::<PriorityTierConfig>(&path).map(|d| config.priority_tiers = d)
            }
            ConfigDocument::BudgetAlerts => {
                load_from_file::<BudgetAlertConfig>(&path).map(|d| config.budget_alerts = d)
            }
            ConfigDocument::ModelCosts => {
                load_from_file::<ModelCostConfig>(&path).map(|d| config.model_costs = d)
            }
            ConfigDocument::RetryPolicy => {
                load_from_file::<RetryPolicyConfig>(&path).map(|d| config.retry_policy = d)
            }
            ConfigDocument::FallbackChain => {
                load_from_file::<FallbackChainConfig>(&path).map(|d| config.fallback_chain = d)
            }
            ConfigDocument::RateLimit => {
                load_from_file::<RateLimitConfig>(&path).map(|d| config.rate_limit = d)
            }
        };

        if let Err(e) = outcome {
            tracing::warn!(
                document = %doc,
                path = %path.display(),
                error = %e,
                "policy document unusable, keeping fallback"
            );
            substituted.push((doc, e));
        }
    }

    LoadReport {
        config,
        substituted,
    }
}

/// Load every document in `dir`, substituting literal defaults.
///
/// # Panics
///
/// This function never panics.
///
/// # Example
///
/// ```rust,ignore
/// use llm_cost_engine::config::loader::load_dir;
/// use std::path::Path;
///
/// let report = load_dir(Path::new("config"));
/// println!("defaulted: {}", report.substituted.len());
/// ```
pub fn load_dir(dir: &Path) -> LoadReport {
    load_dir_over(dir, &CostOptimizationConfig::default())
}

/// Holds the current snapshot for a config directory.
///
/// Readers get a cheap `Arc` clone; [`ConfigLoader::reload`] swaps in a new
/// snapshot and never mutates the old one.
#[derive(Debug)]
pub struct ConfigLoader {
    dir: PathBuf,
    current: RwLock<Arc<CostOptimizationConfig>>,
}

impl ConfigLoader {
    /// Create a loader for `dir`, holding defaults until [`load`](Self::load).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            current: RwLock::new(Arc::new(CostOptimizationConfig::default())),
        }
    }

    /// Directory this loader reads.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load from disk with literal defaults as the per-document fallback.
    pub fn load(&self) -> Arc<CostOptimizationConfig> {
        let report = load_dir(&self.dir);
        self.install(report)
    }

    /// Load from disk with the current snapshot as the per-document
    /// fallback, so a broken edit keeps the last good document.
    pub fn reload(&self) -> Arc<CostOptimizationConfig> {
        let base = self.current();
        let report = load_dir_over(&self.dir, &base);
        self.install(report)
    }

    /// The current snapshot.
    pub fn current(&self) -> Arc<CostOptimizationConfig> {
        Arc::clone(&self.current.read())
    }

    fn install(&self, report: LoadReport) -> Arc<CostOptimizationConfig> {
        tracing::info!(
            dir = %self.dir.display(),
            substituted = report.substituted.len(),
            "policy snapshot loaded"
        );
        let snapshot = Arc::new(report.config);
        *self.current.write() = Arc::clone(&snapshot);
        snapshot
    }
}
