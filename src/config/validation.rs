//! Policy document validation.
//!
//! ## Responsibility
//! Check the constraints serde cannot express: ranges, orderings, regex
//! syntax, and timezone names.
//!
//! ## Guarantees
//! - Validation collects *all* errors before returning (no short-circuit)
//! - Error messages include the field path and the invalid value
//!
//! ## NOT Responsible For
//! - Parsing JSON (that belongs to `loader`)
//! - Choosing a fallback document (that belongs to `loader`)

use super::{
    BudgetAlertConfig, BypassKind, CacheBypassCondition, CachePolicyConfig, ChannelKind,
    ComplexityRouterConfig, CostOptimizationConfig, FallbackChainConfig, HourRange,
    ModelCostConfig, PriorityTierConfig, RateLimitConfig, RetryPolicyConfig,
    TimeBasedRoutingConfig, TokenBudgetConfig,
};
use crate::types::PriorityTier;

/// Errors arising from configuration parsing, validation, or I/O.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// JSON parsing failed.
    #[error("Parse error in {file}: {source}")]
    Parse {
        /// Path of the file that failed to parse.
        file: String,
        /// Underlying JSON deserialization error.
        #[source]
        source: serde_json::Error,
    },

    /// One or more semantic validation rules failed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A specific field has an out-of-range or contradictory value.
    #[error("Field '{field}' has invalid value {value}: {reason}")]
    InvalidField {
        /// Dot-separated field path (e.g., "tokenBudget.resetHour").
        field: String,
        /// String representation of the invalid value.
        value: String,
        /// Human-readable explanation of the constraint.
        reason: String,
    },

    /// File I/O error.
    #[error("IO error reading {file}: {source}")]
    Io {
        /// Path of the file that could not be read.
        file: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// A policy document that can check its own semantic constraints.
pub trait Validate {
    /// Return every violation found, or `Ok(())`.
    ///
    /// # Errors
    ///
    /// Returns all [`ConfigError::InvalidField`] violations at once.
    fn validate(&self) -> Result<(), Vec<ConfigError>>;
}

fn invalid(field: impl Into<String>, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidField {
        field: field.into(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn finish(errors: Vec<ConfigError>) -> Result<(), Vec<ConfigError>> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_regex(errors: &mut Vec<ConfigError>, field: String, pattern: &str) {
    if let Err(e) = regex::Regex::new(pattern) {
        errors.push(ConfigError::InvalidField {
            field,
            value: format!("{pattern:?}"),
            reason: format!("not a valid regex: {e}"),
        });
    }
}

fn check_ratio(errors: &mut Vec<ConfigError>, field: &str, value: f64) {
    if !(0.0..=1.0).contains(&value) {
        errors.push(invalid(field, value, "must be between 0.0 and 1.0"));
    }
}

fn check_hours(errors: &mut Vec<ConfigError>, field: &str, range: &HourRange) {
    if range.start > 23 {
        errors.push(invalid(format!("{field}.start"), range.start, "must be 0-23"));
    }
    if range.end > 23 {
        errors.push(invalid(format!("{field}.end"), range.end, "must be 0-23"));
    }
}

impl Validate for ComplexityRouterConfig {
    fn validate(&self) -> Result<(), Vec<ConfigError>> {
        let mut errors = Vec::new();

        // ── Rules ────────────────────────────────────────────────────────
        for (i, rule) in self.rules.iter().enumerate() {
            check_regex(&mut errors, format!("complexityRouter.rules[{i}].pattern"), &rule.pattern);
            if rule.model.trim().is_empty() {
                errors.push(invalid(
                    format!("complexityRouter.rules[{i}].model"),
                    "\"\"",
                    "must not be empty",
                ));
            }
        }

        if self.default_model.trim().is_empty() {
            errors.push(invalid("complexityRouter.defaultModel", "\"\"", "must not be empty"));
        }

        // ── Thresholds ───────────────────────────────────────────────────
        let t = &self.thresholds;
        if !(t.simple > 0.0 && t.simple <= t.moderate && t.moderate <= t.complex) {
            errors.push(invalid(
                "complexityRouter.thresholds",
                format!("{}/{}/{}", t.simple, t.moderate, t.complex),
                "must be positive and ascending (simple \u{2264} moderate \u{2264} complex)",
            ));
        }

        finish(errors)
    }
}

impl Validate for TokenBudgetConfig {
    fn validate(&self) -> Result<(), Vec<ConfigError>> {
        let mut errors = Vec::new();

        for (field, value) in [
            ("tokenBudget.dailyLimit", self.daily_limit),
            ("tokenBudget.hourlyLimit", self.hourly_limit),
            ("tokenBudget.perRequestLimit", self.per_request_limit),
        ] {
            if value == 0 {
                errors.push(invalid(field, value, "must be at least 1"));
            }
        }

        check_ratio(&mut errors, "tokenBudget.warningThreshold", self.warning_threshold);
        check_ratio(&mut errors, "tokenBudget.hardStopThreshold", self.hard_stop_threshold);
        if self.warning_threshold > self.hard_stop_threshold {
            errors.push(invalid(
                "tokenBudget.warningThreshold",
                self.warning_threshold,
                "must be \u{2264} hardStopThreshold",
            ));
        }

        if self.reset_hour > 23 {
            errors.push(invalid("tokenBudget.resetHour", self.reset_hour, "must be 0-23"));
        }

        // ── Tier limits ──────────────────────────────────────────────────
        for tier in PriorityTier::ALL {
            let limit = self.tier_limits.get(tier);
            if limit.daily_limit == 0 {
                errors.push(invalid(
                    format!("tokenBudget.tierLimits.{tier}.dailyLimit"),
                    0,
                    "must be at least 1",
                ));
            }
            if !(limit.burst_allowance > 0.0) {
                errors.push(invalid(
                    format!("tokenBudget.tierLimits.{tier}.burstAllowance"),
                    limit.burst_allowance,
                    "must be positive",
                ));
            }
        }

        finish(errors)
    }
}

fn validate_bypass(errors: &mut Vec<ConfigError>, i: usize, cond: &CacheBypassCondition) {
    let field = format!("cachePolicy.bypassConditions[{i}].value");
    if cond.value.is_empty() {
        errors.push(invalid(field, "\"\"", "must not be empty"));
    } else if cond.kind == BypassKind::PromptPattern {
        check_regex(errors, field, &cond.value);
    }
}

impl Validate for CachePolicyConfig {
    fn validate(&self) -> Result<(), Vec<ConfigError>> {
        let mut errors = Vec::new();

        if self.exact_match.ttl_seconds == 0 {
            errors.push(invalid("cachePolicy.exactMatch.ttlSeconds", 0, "must be at least 1"));
        }
        if self.semantic_match.ttl_seconds == 0 {
            errors.push(invalid("cachePolicy.semanticMatch.ttlSeconds", 0, "must be at least 1"));
        }

        let threshold = self.semantic_match.similarity_threshold;
        if !(-1.0..=1.0).contains(&threshold) {
            errors.push(invalid(
                "cachePolicy.semanticMatch.similarityThreshold",
                threshold,
                "must be between -1.0 and 1.0",
            ));
        }

        if self.deduplication.enabled && self.deduplication.window_ms == 0 {
            errors.push(invalid(
                "cachePolicy.deduplication.windowMs",
                0,
                "must be at least 1 when deduplication is enabled",
            ));
        }

        for (i, cond) in self.bypass_conditions.iter().enumerate() {
            validate_bypass(&mut errors, i, cond);
        }

        finish(errors)
    }
}

impl Validate for TimeBasedRoutingConfig {
    fn validate(&self) -> Result<(), Vec<ConfigError>> {
        let mut errors = Vec::new();

        if self.timezone.parse::<chrono_tz::Tz>().is_err() {
            errors.push(invalid(
                "timeBasedRouting.timezone",
                format!("{:?}", self.timezone),
                "not a known IANA timezone",
            ));
        }

        check_hours(&mut errors, "timeBasedRouting.peakHours", &self.peak_hours);
        check_hours(&mut errors, "timeBasedRouting.offPeakHours", &self.off_peak_hours);
        if self.peak_hours.start > self.peak_hours.end {
            errors.push(invalid(
                "timeBasedRouting.peakHours",
                format!("{}-{}", self.peak_hours.start, self.peak_hours.end),
                "peak range must not wrap past midnight",
            ));
        }

        for (field, model) in [
            ("timeBasedRouting.peakModel", &self.peak_model),
            ("timeBasedRouting.offPeakModel", &self.off_peak_model),
            ("timeBasedRouting.weekendModel", &self.weekend_model),
        ] {
            if model.trim().is_empty() {
                errors.push(invalid(field, "\"\"", "must not be empty"));
            }
        }

        finish(errors)
    }
}

impl Validate for PriorityTierConfig {
    fn validate(&self) -> Result<(), Vec<ConfigError>> {
        let mut errors = Vec::new();
        for (i, rule) in self.rules.iter().enumerate() {
            check_regex(&mut errors, format!("priorityTiers.rules[{i}].pattern"), &rule.pattern);
        }
        finish(errors)
    }
}

impl Validate for BudgetAlertConfig {
    fn validate(&self) -> Result<(), Vec<ConfigError>> {
        let mut errors = Vec::new();

        for (i, threshold) in self.thresholds.iter().enumerate() {
            if !(threshold.percent >= 0.0) {
                errors.push(invalid(
                    format!("budgetAlerts.thresholds[{i}].percent"),
                    threshold.percent,
                    "must be non-negative",
                ));
            }
        }

        for (i, channel) in self.channels.iter().enumerate() {
            if channel.kind == ChannelKind::Webhook
                && channel.target.as_deref().map_or(true, str::is_empty)
            {
                errors.push(invalid(
                    format!("budgetAlerts.channels[{i}].target"),
                    "null",
                    "webhook channels need a URL",
                ));
            }
        }

        finish(errors)
    }
}

impl Validate for ModelCostConfig {
    fn validate(&self) -> Result<(), Vec<ConfigError>> {
        let mut errors = Vec::new();
        let priced = self
            .models
            .iter()
            .map(|(name, cost)| (format!("modelCosts.models.{name}"), cost))
            .chain(std::iter::once(("modelCosts.defaultCost".to_string(), &self.default_cost)));
        for (field, cost) in priced {
            if !(cost.input_cost_per_1k >= 0.0) {
                errors.push(invalid(
                    format!("{field}.inputCostPer1k"),
                    cost.input_cost_per_1k,
                    "must be non-negative",
                ));
            }
            if !(cost.output_cost_per_1k >= 0.0) {
                errors.push(invalid(
                    format!("{field}.outputCostPer1k"),
                    cost.output_cost_per_1k,
                    "must be non-negative",
                ));
            }
        }
        finish(errors)
    }
}

impl Validate for RetryPolicyConfig {
    fn validate(&self) -> Result<(), Vec<ConfigError>> {
        let mut errors = Vec::new();
        if self.base_delay_ms > self.max_delay_ms {
            errors.push(invalid(
                "retryPolicy.baseDelayMs",
                self.base_delay_ms,
                "must be \u{2264} maxDelayMs",
            ));
        }
        finish(errors)
    }
}

impl Validate for FallbackChainConfig {
    fn validate(&self) -> Result<(), Vec<ConfigError>> {
        let mut errors = Vec::new();
        if self.timeout == 0 {
            errors.push(invalid("fallbackChain.timeout", 0, "must be at least 1 ms"));
        }
        for (name, chain) in &self.chains {
            if chain.iter().any(|m| m.trim().is_empty()) {
                errors.push(invalid(
                    format!("fallbackChain.chains.{name}"),
                    format!("{chain:?}"),
                    "model names must not be empty",
                ));
            }
        }
        finish(errors)
    }
}

impl Validate for RateLimitConfig {
    fn validate(&self) -> Result<(), Vec<ConfigError>> {
        let mut errors = Vec::new();
        if self.enabled {
            for (field, value) in [
                ("rateLimit.requestsPerMinute", self.requests_per_minute),
                ("rateLimit.requestsPerHour", self.requests_per_hour),
                ("rateLimit.burstSize", self.burst_size),
            ] {
                if value == 0 {
                    errors.push(invalid(field, value, "must be at least 1 when enabled"));
                }
            }
        }
        finish(errors)
    }
}

impl Validate for CostOptimizationConfig {
    fn validate(&self) -> Result<(), Vec<ConfigError>> {
        let results = [
            self.complexity_router.validate(),
            self.token_budget.validate(),
            self.cache_policy.validate(),
            self.time_based_routing.validate(),
            self.priority_tiers.validate(),
            self.budget_alerts.validate(),
            self.model_costs.validate(),
            self.retry_policy.validate(),
            self.fallback_chain.validate(),
            self.rate_limit.validate(),
        ];
        finish(results.into_iter().filter_map(Result::err).flatten().collect())
    }
}

/// Validate a whole snapshot.
///
/// # Errors
///
/// Returns every violation across all ten documents.
///
/// # Panics
///
/// This function never panics.
pub fn validate(config: &CostOptimizationConfig) -> Result<(), Vec<ConfigError>> {
    config.validate()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AlertChannelConfig, ComplexityRule};
    use crate::types::ComplexityLevel;

    fn field_names(errors: &[ConfigError]) -> Vec<String> {
        errors
            .iter()
            .filter_map(|e| match e {
                ConfigError::InvalidField { field, .. } => Some(field.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&CostOptimizationConfig::default()).is_ok());
    }

    #[test]
    fn test_invalid_complexity_regex_is_reported() {
        let mut cfg = ComplexityRouterConfig::default();
        cfg.rules.push(ComplexityRule {
            pattern: "(unclosed".into(),
            task_type: None,
            complexity: ComplexityLevel::Simple,
            model: "m".into(),
            max_tokens: None,
        });
        let errors = cfg.validate().expect_err("test: bad regex");
        assert_eq!(field_names(&errors), vec!["complexityRouter.rules[0].pattern"]);
    }

    #[test]
    fn test_descending_thresholds_are_rejected() {
        let mut cfg = ComplexityRouterConfig::default();
        cfg.thresholds.moderate = 50.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_budget_collects_all_errors() {
        let cfg = TokenBudgetConfig {
            daily_limit: 0,
            reset_hour: 24,
            warning_threshold: 1.5,
            ..TokenBudgetConfig::default()
        };
        let errors = cfg.validate().expect_err("test: invalid budget");
        let fields = field_names(&errors);
        assert!(fields.contains(&"tokenBudget.dailyLimit".to_string()));
        assert!(fields.contains(&"tokenBudget.resetHour".to_string()));
        assert!(fields.contains(&"tokenBudget.warningThreshold".to_string()));
    }

    #[test]
    fn test_warning_above_hard_stop_is_rejected() {
        let cfg = TokenBudgetConfig {
            warning_threshold: 0.9,
            hard_stop_threshold: 0.8,
            ..TokenBudgetConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_unknown_timezone_is_rejected() {
        let cfg = TimeBasedRoutingConfig {
            timezone: "Mars/Olympus".into(),
            ..TimeBasedRoutingConfig::default()
        };
        let errors = cfg.validate().expect_err("test: bad tz");
        assert_eq!(field_names(&errors), vec!["timeBasedRouting.timezone"]);
    }

    #[test]
    fn test_named_timezone_is_accepted() {
        let cfg = TimeBasedRoutingConfig {
            timezone: "Europe/Berlin".into(),
            ..TimeBasedRoutingConfig::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_wrapping_peak_range_is_rejected() {
        let cfg = TimeBasedRoutingConfig {
            peak_hours: HourRange { start: 20, end: 2 },
            ..TimeBasedRoutingConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_webhook_without_target_is_rejected() {
        let cfg = BudgetAlertConfig {
            channels: vec![AlertChannelConfig {
                kind: ChannelKind::Webhook,
                target: None,
            }],
            ..BudgetAlertConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_bypass_pattern_must_compile() {
        let cfg = CachePolicyConfig {
            bypass_conditions: vec![CacheBypassCondition {
                kind: BypassKind::PromptPattern,
                value: "[".into(),
            }],
            ..CachePolicyConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_retry_base_above_max_is_rejected() {
        let cfg = RetryPolicyConfig {
            base_delay_ms: 10_000,
            max_delay_ms: 100,
            ..RetryPolicyConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_disabled_rate_limit_skips_zero_checks() {
        let cfg = RateLimitConfig {
            enabled: false,
            requests_per_minute: 0,
            requests_per_hour: 0,
            burst_size: 0,
        };
        assert!(cfg.validate().is_ok());
        let enabled = RateLimitConfig { enabled: true, ..cfg };
        assert_eq!(enabled.validate().map_err(|e| e.len()), Err(3));
    }

    #[test]
    fn test_negative_model_cost_is_rejected() {
        let mut cfg = ModelCostConfig::default();
        cfg.default_cost.output_cost_per_1k = -1.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_invalid_field_display_includes_path_and_reason() {
        let err = invalid("tokenBudget.resetHour", 30, "must be 0-23");
        let text = err.to_string();
        assert!(text.contains("tokenBudget.resetHour"));
        assert!(text.contains("must be 0-23"));
    }
}
