//! # Policy Configuration
//!
//! ## Responsibility
//! Define the ten JSON policy documents that steer the engine, their
//! literal defaults, and the combined [`CostOptimizationConfig`] snapshot.
//!
//! ## Guarantees
//! - Each document has an independent, literal [`Default`]
//! - Field names on disk are camelCase; optional lists default to empty
//! - A snapshot is immutable once built; reload produces a new `Arc`
//! - Schema-exportable: [`export_schema`] emits JSON Schema for editors
//!
//! ## NOT Responsible For
//! - Reading files (that belongs to `loader`)
//! - Semantic checks (that belongs to `validation`)
//! - Watching for edits (that belongs to `watcher`)

pub mod loader;
pub mod validation;
pub mod watcher;

pub use loader::{load_dir, load_from_file, load_from_str, ConfigLoader, LoadReport};
pub use validation::{validate, ConfigError};
pub use watcher::ConfigWatcher;

use std::collections::BTreeMap;
use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::types::{AlertLevel, ComplexityLevel, PriorityTier};

// ── Default value functions ──────────────────────────────────────────────

fn default_true() -> bool {
    true
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// Default fallback attempt timeout: 30 000 ms.
fn default_fallback_timeout_ms() -> u64 {
    30_000
}

// ── Complexity router ────────────────────────────────────────────────────

/// `complexity-router.json`: rule list plus heuristic thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComplexityRouterConfig {
    /// Rules evaluated in order; first match wins.
    #[serde(default)]
    pub rules: Vec<ComplexityRule>,
    /// Model served for moderate requests when no rule names one.
    pub default_model: String,
    /// Score boundaries between levels.
    pub thresholds: ComplexityThresholds,
}

impl Default for ComplexityRouterConfig {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            default_model: "claude-sonnet-4".to_string(),
            thresholds: ComplexityThresholds {
                simple: 100.0,
                moderate: 500.0,
                complex: 2000.0,
            },
        }
    }
}

/// One explicit complexity rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComplexityRule {
    /// Case-insensitive regex tested against the prompt.
    pub pattern: String,
    /// Task type that also selects this rule.
    #[serde(default)]
    pub task_type: Option<String>,
    /// Level assigned on match.
    pub complexity: ComplexityLevel,
    /// Model assigned on match.
    pub model: String,
    /// Optional completion token cap.
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

/// Heuristic score boundaries: `simple < T1 <= moderate < T2 <= complex < T3 <= expert`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ComplexityThresholds {
    /// Scores below this are simple.
    pub simple: f64,
    /// Scores below this are moderate.
    pub moderate: f64,
    /// Scores below this are complex; anything else is expert.
    pub complex: f64,
}

// ── Token budget ─────────────────────────────────────────────────────────

/// `token-budget-policy.json`: global and per-tier token limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TokenBudgetConfig {
    /// Tokens allowed per budget day.
    pub daily_limit: u64,
    /// Tokens allowed in any rolling hour.
    pub hourly_limit: u64,
    /// Largest single request admitted.
    pub per_request_limit: u64,
    /// Utilisation ratio (0..1) at which admission warns.
    pub warning_threshold: f64,
    /// Utilisation ratio (0..1) at which admission denies.
    pub hard_stop_threshold: f64,
    /// Hour of day (UTC, 0-23) at which daily counters reset.
    pub reset_hour: u32,
    /// Limits per priority tier.
    pub tier_limits: TierLimits,
}

impl Default for TokenBudgetConfig {
    fn default() -> Self {
        Self {
            daily_limit: 1_000_000,
            hourly_limit: 100_000,
            per_request_limit: 32_768,
            warning_threshold: 0.8,
            hard_stop_threshold: 0.95,
            reset_hour: 0,
            tier_limits: TierLimits::default(),
        }
    }
}

/// Limits for every tier; all five tiers are required on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TierLimits {
    /// Limits for [`PriorityTier::Critical`].
    pub critical: TierLimit,
    /// Limits for [`PriorityTier::High`].
    pub high: TierLimit,
    /// Limits for [`PriorityTier::Normal`].
    pub normal: TierLimit,
    /// Limits for [`PriorityTier::Low`].
    pub low: TierLimit,
    /// Limits for [`PriorityTier::Batch`].
    pub batch: TierLimit,
}

impl TierLimits {
    /// Limits for `tier`.
    pub fn get(&self, tier: PriorityTier) -> &TierLimit {
        match tier {
            PriorityTier::Critical => &self.critical,
            PriorityTier::High => &self.high,
            PriorityTier::Normal => &self.normal,
            PriorityTier::Low => &self.low,
            PriorityTier::Batch => &self.batch,
        }
    }
}

impl Default for TierLimits {
    fn default() -> Self {
        Self {
            critical: TierLimit::new(500_000, 65_536, 1.5),
            high: TierLimit::new(300_000, 32_768, 1.2),
            normal: TierLimit::new(150_000, 16_384, 1.0),
            low: TierLimit::new(40_000, 8_192, 0.8),
            batch: TierLimit::new(10_000, 4_096, 0.5),
        }
    }
}

/// Token limits for one tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TierLimit {
    /// Tokens this tier may use per budget day, before burst scaling.
    pub daily_limit: u64,
    /// Largest single request this tier may make.
    pub per_request_limit: u64,
    /// Multiplier applied to `daily_limit` at admission.
    pub burst_allowance: f64,
}

impl TierLimit {
    /// Create a tier limit.
    pub fn new(daily_limit: u64, per_request_limit: u64, burst_allowance: f64) -> Self {
        Self {
            daily_limit,
            per_request_limit,
            burst_allowance,
        }
    }
}

// ── Cache policy ─────────────────────────────────────────────────────────

/// `cache-policy.json`: exact, semantic, and coalescing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CachePolicyConfig {
    /// Master switch for both caches.
    pub enabled: bool,
    /// Exact-match cache.
    pub exact_match: ExactMatchConfig,
    /// Similarity cache.
    pub semantic_match: SemanticMatchConfig,
    /// In-flight request coalescing.
    pub deduplication: DeduplicationConfig,
    /// Conditions that skip both caches.
    #[serde(default)]
    pub bypass_conditions: Vec<CacheBypassCondition>,
}

impl Default for CachePolicyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            exact_match: ExactMatchConfig {
                enabled: true,
                ttl_seconds: 3600,
                max_entries: 10_000,
            },
            semantic_match: SemanticMatchConfig {
                enabled: false,
                similarity_threshold: 0.92,
                ttl_seconds: 1800,
                max_entries: 5000,
            },
            deduplication: DeduplicationConfig {
                enabled: true,
                window_ms: 5000,
            },
            bypass_conditions: Vec::new(),
        }
    }
}

/// Exact cache settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExactMatchConfig {
    /// Whether the exact cache is consulted.
    pub enabled: bool,
    /// Entry lifetime.
    pub ttl_seconds: u64,
    /// Capacity; `0` stores nothing.
    pub max_entries: usize,
}

/// Semantic cache settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SemanticMatchConfig {
    /// Whether the semantic cache is consulted.
    pub enabled: bool,
    /// A match must score strictly above this cosine similarity.
    pub similarity_threshold: f64,
    /// Entry lifetime.
    pub ttl_seconds: u64,
    /// Capacity; `0` stores nothing.
    pub max_entries: usize,
}

/// Coalescing settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeduplicationConfig {
    /// Whether identical concurrent requests share one upstream call.
    pub enabled: bool,
    /// Attach window after registration, and retention after settling.
    pub window_ms: u64,
}

/// What a bypass condition inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BypassKind {
    /// Task type equals `value`.
    TaskType,
    /// Requested model equals `value`.
    Model,
    /// Header named `value` is present and non-empty.
    Header,
    /// Case-insensitive regex `value` matches the prompt.
    PromptPattern,
}

/// One cache bypass condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CacheBypassCondition {
    /// Condition kind.
    #[serde(rename = "type")]
    pub kind: BypassKind,
    /// Comparison value.
    pub value: String,
}

// ── Time-based routing ───────────────────────────────────────────────────

/// `time-based-routing.json`: model choice by local hour and weekday.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TimeBasedRoutingConfig {
    /// When false, the peak model is always returned.
    pub enabled: bool,
    /// IANA timezone name (e.g. `"America/New_York"`).
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Non-wrapping peak range.
    pub peak_hours: HourRange,
    /// Off-peak range; may wrap across midnight.
    pub off_peak_hours: HourRange,
    /// Model for peak and standard hours.
    pub peak_model: String,
    /// Model for off-peak hours.
    pub off_peak_model: String,
    /// Model for Saturday and Sunday.
    pub weekend_model: String,
}

impl Default for TimeBasedRoutingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timezone: default_timezone(),
            peak_hours: HourRange { start: 9, end: 17 },
            off_peak_hours: HourRange { start: 22, end: 6 },
            peak_model: "claude-haiku-3-5".to_string(),
            off_peak_model: "claude-opus-4".to_string(),
            weekend_model: "claude-sonnet-4".to_string(),
        }
    }
}

/// Half-open hour range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct HourRange {
    /// First hour inside the range (0-23).
    pub start: u32,
    /// First hour after the range (0-23).
    pub end: u32,
}

impl HourRange {
    /// Whether `hour` lies in the range, wrapping past midnight when
    /// `start > end`.
    pub fn contains(&self, hour: u32) -> bool {
        if self.start <= self.end {
            hour >= self.start && hour < self.end
        } else {
            hour >= self.start || hour < self.end
        }
    }

    /// Whether `hour` lies in `[start, end)` on the same day. A range with
    /// `start > end` contains nothing.
    pub fn contains_within_day(&self, hour: u32) -> bool {
        hour >= self.start && hour < self.end
    }
}

// ── Priority tiers ───────────────────────────────────────────────────────

/// `priority-tiers.json`: rules assigning a tier to each request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PriorityTierConfig {
    /// Rules evaluated in order; first full match wins.
    #[serde(default)]
    pub rules: Vec<PriorityRule>,
    /// Tier used when nothing matches.
    pub default_tier: PriorityTier,
}

impl Default for PriorityTierConfig {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            default_tier: PriorityTier::Normal,
        }
    }
}

/// One priority rule; every specified field must match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PriorityRule {
    /// Case-insensitive regex tested against the prompt.
    pub pattern: String,
    /// Required task type, if set.
    #[serde(default)]
    pub task_type: Option<String>,
    /// Required source, if set.
    #[serde(default)]
    pub source: Option<String>,
    /// Tier assigned on match.
    pub tier: PriorityTier,
}

// ── Budget alerts ────────────────────────────────────────────────────────

/// `budget-alerts.json`: thresholds, cooldown, and delivery channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BudgetAlertConfig {
    /// When false, nothing is emitted.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Delivery channels.
    #[serde(default)]
    pub channels: Vec<AlertChannelConfig>,
    /// Percent thresholds; only the highest exceeded one fires.
    #[serde(default)]
    pub thresholds: Vec<AlertThreshold>,
    /// Suppression window per cooldown key.
    pub cooldown_minutes: u64,
}

impl Default for BudgetAlertConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            channels: vec![AlertChannelConfig {
                kind: ChannelKind::Console,
                target: None,
            }],
            thresholds: vec![
                AlertThreshold {
                    percent: 80.0,
                    level: AlertLevel::Warning,
                    message: "Budget at 80%".to_string(),
                },
                AlertThreshold {
                    percent: 95.0,
                    level: AlertLevel::Critical,
                    message: "Budget at 95%".to_string(),
                },
            ],
            cooldown_minutes: 15,
        }
    }
}

/// Alert channel kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Daily append-only log file.
    File,
    /// JSON POST to `target`.
    Webhook,
    /// Process log output.
    Console,
}

/// One alert channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AlertChannelConfig {
    /// Channel kind.
    #[serde(rename = "type")]
    pub kind: ChannelKind,
    /// File path, directory (trailing `/`), or webhook URL.
    #[serde(default)]
    pub target: Option<String>,
}

/// One alert threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AlertThreshold {
    /// Percent of budget (0-100) at which this fires.
    pub percent: f64,
    /// Alert severity.
    pub level: AlertLevel,
    /// Human-readable message.
    pub message: String,
}

// ── Model costs ──────────────────────────────────────────────────────────

/// `model-costs.json`: USD per thousand tokens by model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ModelCostConfig {
    /// Known models.
    #[serde(default)]
    pub models: BTreeMap<String, ModelCost>,
    /// Pricing for unrecognised models.
    pub default_cost: ModelCost,
}

impl ModelCostConfig {
    /// Pricing for `model`, or the default.
    pub fn cost_for(&self, model: &str) -> &ModelCost {
        self.models.get(model).unwrap_or(&self.default_cost)
    }
}

impl Default for ModelCostConfig {
    fn default() -> Self {
        Self {
            models: BTreeMap::new(),
            default_cost: ModelCost {
                input_cost_per_1k: 0.003,
                output_cost_per_1k: 0.015,
                context_window: 100_000,
            },
        }
    }
}

/// Pricing of one model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ModelCost {
    /// USD per 1 000 prompt tokens.
    #[serde(rename = "inputCostPer1k")]
    pub input_cost_per_1k: f64,
    /// USD per 1 000 completion tokens.
    #[serde(rename = "outputCostPer1k")]
    pub output_cost_per_1k: f64,
    /// Context window in tokens.
    #[serde(rename = "contextWindow")]
    pub context_window: u64,
}

// ── Retry, fallback, rate limit ──────────────────────────────────────────

/// `retry-policy.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicyConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay_ms: u64,
    /// Upper bound on any delay.
    pub max_delay_ms: u64,
    /// Error codes worth retrying.
    #[serde(default)]
    pub retryable_errors: Vec<String>,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            retryable_errors: vec![
                "RATE_LIMIT_EXCEEDED".to_string(),
                "SERVICE_UNAVAILABLE".to_string(),
                "TIMEOUT".to_string(),
            ],
        }
    }
}

/// `fallback-chain.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FallbackChainConfig {
    /// Fallback models keyed by primary model; `"default"` covers the rest.
    #[serde(default)]
    pub chains: BTreeMap<String, Vec<String>>,
    /// Per-attempt timeout in milliseconds.
    #[serde(default = "default_fallback_timeout_ms")]
    pub timeout: u64,
}

impl Default for FallbackChainConfig {
    fn default() -> Self {
        let mut chains = BTreeMap::new();
        chains.insert("default".to_string(), vec!["claude-sonnet-4".to_string()]);
        Self {
            chains,
            timeout: default_fallback_timeout_ms(),
        }
    }
}

/// `rate-limit.json`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    /// When false, every request is allowed.
    pub enabled: bool,
    /// Sustained refill rate.
    pub requests_per_minute: u32,
    /// Hard cap per hour window.
    pub requests_per_hour: u32,
    /// Bucket capacity.
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            requests_per_minute: 60,
            requests_per_hour: 1000,
            burst_size: 10,
        }
    }
}

// ── Combined snapshot ────────────────────────────────────────────────────

/// All ten policy documents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CostOptimizationConfig {
    /// `complexity-router.json`
    pub complexity_router: ComplexityRouterConfig,
    /// `token-budget-policy.json`
    pub token_budget: TokenBudgetConfig,
    /// `cache-policy.json`
    pub cache_policy: CachePolicyConfig,
    /// `time-based-routing.json`
    pub time_based_routing: TimeBasedRoutingConfig,
    /// `priority-tiers.json`
    pub priority_tiers: PriorityTierConfig,
    /// `budget-alerts.json`
    pub budget_alerts: BudgetAlertConfig,
    /// `model-costs.json`
    pub model_costs: ModelCostConfig,
    /// `retry-policy.json`
    pub retry_policy: RetryPolicyConfig,
    /// `fallback-chain.json`
    pub fallback_chain: FallbackChainConfig,
    /// `rate-limit.json`
    pub rate_limit: RateLimitConfig,
}

/// Identifies one of the ten policy documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigDocument {
    /// `complexity-router.json`
    ComplexityRouter,
    /// `token-budget-policy.json`
    TokenBudget,
    /// `cache-policy.json`
    CachePolicy,
    /// `time-based-routing.json`
    TimeBasedRouting,
    /// `priority-tiers.json`
    PriorityTiers,
    /// `budget-alerts.json`
    BudgetAlerts,
    /// `model-costs.json`
    ModelCosts,
    /// `retry-policy.json`
    RetryPolicy,
    /// `fallback-chain.json`
    FallbackChain,
    /// `rate-limit.json`
    RateLimit,
}

impl ConfigDocument {
    /// Every document, in load order.
    pub const ALL: [ConfigDocument; 10] = [
        ConfigDocument::ComplexityRouter,
        ConfigDocument::TokenBudget,
        ConfigDocument::CachePolicy,
        ConfigDocument::TimeBasedRouting,
        ConfigDocument::PriorityTiers,
        ConfigDocument::BudgetAlerts,
        ConfigDocument::ModelCosts,
        ConfigDocument::RetryPolicy,
        ConfigDocument::FallbackChain,
        ConfigDocument::RateLimit,
    ];

    /// File name inside the config directory.
    pub fn file_name(self) -> &'static str {
        match self {
            ConfigDocument::ComplexityRouter => "complexity-router.json",
            ConfigDocument::TokenBudget => "token-budget-policy.json",
            ConfigDocument::CachePolicy => "cache-policy.json",
            ConfigDocument::TimeBasedRouting => "time-based-routing.json",
            ConfigDocument::PriorityTiers => "priority-tiers.json",
            ConfigDocument::BudgetAlerts => "budget-alerts.json",
            ConfigDocument::ModelCosts => "model-costs.json",
            ConfigDocument::RetryPolicy => "retry-policy.json",
            ConfigDocument::FallbackChain => "fallback-chain.json",
            ConfigDocument::RateLimit => "rate-limit.json",
        }
    }

    /// Find the document stored under `file_name`.
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.file_name() == file_name)
    }
}

impl fmt::Display for ConfigDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

/// Export the JSON Schema for [`CostOptimizationConfig`].
///
/// # Errors
///
/// Returns a serialization error if the schema cannot be rendered.
///
/// # Panics
///
/// This function never panics.
pub fn export_schema() -> Result<String, serde_json::Error> {
    let schema = schemars::schema_for!(CostOptimizationConfig);
    serde_json::to_string_pretty(&schema)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_budget_matches_documented_values() {
        let budget = TokenBudgetConfig::default();
        assert_eq!(budget.daily_limit, 1_000_000);
        assert_eq!(budget.hourly_limit, 100_000);
        assert!((budget.hard_stop_threshold - 0.95).abs() < f64::EPSILON);
        assert_eq!(budget.tier_limits.get(PriorityTier::Batch).daily_limit, 10_000);
    }

    #[test]
    fn test_hour_range_non_wrapping() {
        let peak = HourRange { start: 9, end: 17 };
        assert!(peak.contains(9));
        assert!(peak.contains(16));
        assert!(!peak.contains(17));
        assert!(!peak.contains(8));
    }

    #[test]
    fn test_hour_range_wraps_past_midnight() {
        let off_peak = HourRange { start: 22, end: 6 };
        assert!(off_peak.contains(23));
        assert!(off_peak.contains(0));
        assert!(off_peak.contains(5));
        assert!(!off_peak.contains(6));
        assert!(!off_peak.contains(21));
    }

    #[test]
    fn test_model_cost_keys_are_camel_case() {
        let json = r#"{"inputCostPer1k": 0.001, "outputCostPer1k": 0.002, "contextWindow": 8000}"#;
        let cost: ModelCost = serde_json::from_str(json).expect("test: parse");
        assert!((cost.input_cost_per_1k - 0.001).abs() < f64::EPSILON);
        assert_eq!(cost.context_window, 8000);
    }

    #[test]
    fn test_cost_for_unknown_model_uses_default() {
        let costs = ModelCostConfig::default();
        assert_eq!(costs.cost_for("mystery"), &costs.default_cost);
    }

    #[test]
    fn test_bypass_condition_parses_type_field() {
        let json = r#"{"type": "prompt_pattern", "value": "^no-cache"}"#;
        let cond: CacheBypassCondition = serde_json::from_str(json).expect("test: parse");
        assert_eq!(cond.kind, BypassKind::PromptPattern);
    }

    #[test]
    fn test_config_document_file_names_are_unique() {
        let mut names: Vec<_> = ConfigDocument::ALL.iter().map(|d| d.file_name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), 10);
    }

    #[test]
    fn test_config_document_from_file_name_round_trips() {
        for doc in ConfigDocument::ALL {
            assert_eq!(ConfigDocument::from_file_name(doc.file_name()), Some(doc));
        }
        assert_eq!(ConfigDocument::from_file_name("other.json"), None);
    }

    #[test]
    fn test_export_schema_names_every_document() {
        let schema = export_schema().expect("test: schema");
        assert!(schema.contains("complexityRouter"));
        assert!(schema.contains("rateLimit"));
    }

    #[test]
    fn test_alert_config_enabled_defaults_true_when_omitted() {
        let json = r#"{"cooldownMinutes": 5}"#;
        let cfg: BudgetAlertConfig = serde_json::from_str(json).expect("test: parse");
        assert!(cfg.enabled);
        assert!(cfg.channels.is_empty());
    }
}
