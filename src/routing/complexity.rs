//! Prompt complexity classification.
//!
//! Rules are tried in order; the first whose pattern matches the prompt, or
//! whose task type equals the request's, decides the level and model. With
//! no matching rule a heuristic score is bucketed against the configured
//! thresholds:
//!
//! | Signal                                   | Multiplier |
//! |------------------------------------------|------------|
//! | Base: estimated tokens (`ceil(chars/4)`) | n/a        |
//! | Fenced code block                        | ×1.3       |
//! | Multi-step cues (`step 1`, `then`, ...)  | ×1.2       |
//! | More than 20 lines                       | ×1.2       |
//! | Analytical verbs (`explain`, `compare`)  | ×1.5       |

use regex::{Regex, RegexBuilder};

use crate::config::{ComplexityRouterConfig, ComplexityRule, ComplexityThresholds};
use crate::types::{ComplexityLevel, CostRequestContext};

/// Capability order used by [`ComplexityClassifier::is_model_appropriate`].
pub const MODEL_LADDER: [&str; 5] = [
    "claude-haiku-3-5",
    "gpt-4o-mini",
    "claude-sonnet-4",
    "gpt-4o",
    "claude-opus-4",
];

/// Approximate token count: one token per four characters, rounded up.
///
/// # Panics
///
/// This function never panics.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

/// Outcome of [`ComplexityClassifier::classify`].
#[derive(Debug, Clone, PartialEq)]
pub struct ComplexityResult {
    /// Assigned level.
    pub level: ComplexityLevel,
    /// Model chosen for the level.
    pub model: String,
    /// Output cap from the matching rule, if any.
    pub max_tokens: Option<u32>,
    /// Human-readable explanation.
    pub reason: String,
}

struct CompiledRule {
    /// `None` when the pattern failed to compile; the rule then matches on
    /// task type only.
    pattern: Option<Regex>,
    rule: ComplexityRule,
}

struct Signals {
    multi_step: Regex,
    analytical: Regex,
}

impl Signals {
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            multi_step: Regex::new(r"(?i)(step\s*\d|first|second|third|then|finally)")?,
            analytical: Regex::new(r"(?i)(explain|analyze|compare|evaluate|design)")?,
        })
    }
}

/// Rule-first, heuristic-fallback complexity classifier.
///
/// Immutable after construction and safe to share across tasks.
pub struct ComplexityClassifier {
    rules: Vec<CompiledRule>,
    default_model: String,
    thresholds: ComplexityThresholds,
    signals: Option<Signals>,
}

impl ComplexityClassifier {
    /// Compile the rule list. Invalid patterns are logged and disabled.
    pub fn new(config: &ComplexityRouterConfig) -> Self {
        let rules = config
            .rules
            .iter()
            .map(|rule| {
                let pattern = RegexBuilder::new(&rule.pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| {
                        tracing::warn!(
                            pattern = %rule.pattern,
                            error = %e,
                            "complexity rule pattern invalid, matching on task type only"
                        );
                    })
                    .ok();
                CompiledRule {
                    pattern,
                    rule: rule.clone(),
                }
            })
            .collect();

        let signals = Signals::new()
            .map_err(|e| tracing::error!(error = %e, "complexity signals failed to compile"))
            .ok();

        Self {
            rules,
            default_model: config.default_model.clone(),
            thresholds: config.thresholds,
            signals,
        }
    }

    /// Classify a request.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn classify(&self, ctx: &CostRequestContext) -> ComplexityResult {
        for compiled in &self.rules {
            let rule = &compiled.rule;
            if compiled
                .pattern
                .as_ref()
                .is_some_and(|re| re.is_match(&ctx.prompt))
            {
                return ComplexityResult {
                    level: rule.complexity,
                    model: rule.model.clone(),
                    max_tokens: rule.max_tokens,
                    reason: format!("pattern match: \"{}\"", rule.pattern),
                };
            }
            if let (Some(want), Some(have)) = (&rule.task_type, &ctx.task_type) {
                if want == have {
                    return ComplexityResult {
                        level: rule.complexity,
                        model: rule.model.clone(),
                        max_tokens: rule.max_tokens,
                        reason: format!("task type match: \"{want}\""),
                    };
                }
            }
        }

        let tokens = estimate_tokens(&ctx.prompt);
        let level = self.bucket(self.heuristic_score(&ctx.prompt, tokens));
        ComplexityResult {
            level,
            model: self.model_for_level(level),
            max_tokens: None,
            reason: format!("heuristic classification ({tokens} tokens)"),
        }
    }

    fn heuristic_score(&self, prompt: &str, tokens: u64) -> f64 {
        let mut score = tokens as f64;
        if prompt.matches("```").count() >= 2 {
            score *= 1.3;
        }
        if let Some(signals) = &self.signals {
            if signals.multi_step.is_match(prompt) {
                score *= 1.2;
            }
        }
        if prompt.split('\n').count() > 20 {
            score *= 1.2;
        }
        if let Some(signals) = &self.signals {
            if signals.analytical.is_match(prompt) {
                score *= 1.5;
            }
        }
        score
    }

    fn bucket(&self, score: f64) -> ComplexityLevel {
        let t = &self.thresholds;
        if score < t.simple {
            ComplexityLevel::Simple
        } else if score < t.moderate {
            ComplexityLevel::Moderate
        } else if score < t.complex {
            ComplexityLevel::Complex
        } else {
            ComplexityLevel::Expert
        }
    }

    /// Model for `level`: the first rule with that level, else the built-in
    /// default for the level.
    pub fn model_for_level(&self, level: ComplexityLevel) -> String {
        if let Some(compiled) = self.rules.iter().find(|c| c.rule.complexity == level) {
            return compiled.rule.model.clone();
        }
        match level {
            ComplexityLevel::Simple => "claude-haiku-3-5".to_string(),
            ComplexityLevel::Moderate => self.default_model.clone(),
            ComplexityLevel::Complex => "claude-sonnet-4".to_string(),
            ComplexityLevel::Expert => "claude-opus-4".to_string(),
        }
    }

    /// Whether `model` is at least as capable as the model for `level`.
    ///
    /// Models missing from [`MODEL_LADDER`] are assumed appropriate.
    pub fn is_model_appropriate(&self, model: &str, level: ComplexityLevel) -> bool {
        let expected = self.model_for_level(level);
        let rank = |m: &str| MODEL_LADDER.iter().position(|l| *l == m);
        match (rank(model), rank(&expected)) {
            (Some(have), Some(want)) => have >= want,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(pattern: &str, task_type: Option<&str>, level: ComplexityLevel, model: &str) -> ComplexityRule {
        ComplexityRule {
            pattern: pattern.into(),
            task_type: task_type.map(str::to_string),
            complexity: level,
            model: model.into(),
            max_tokens: Some(256),
        }
    }

    fn config(rules: Vec<ComplexityRule>) -> ComplexityRouterConfig {
        ComplexityRouterConfig {
            rules,
            default_model: "gpt-4o-mini".into(),
            thresholds: ComplexityThresholds {
                simple: 100.0,
                moderate: 500.0,
                complex: 2000.0,
            },
        }
    }

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_rule_pattern_match_is_case_insensitive() {
        let c = ComplexityClassifier::new(&config(vec![rule(
            "^translate",
            None,
            ComplexityLevel::Simple,
            "claude-haiku-3-5",
        )]));
        let result = c.classify(&CostRequestContext::new("TRANSLATE this"));
        assert_eq!(result.level, ComplexityLevel::Simple);
        assert_eq!(result.model, "claude-haiku-3-5");
        assert_eq!(result.max_tokens, Some(256));
    }

    #[test]
    fn test_rule_task_type_match_without_pattern_match() {
        let c = ComplexityClassifier::new(&config(vec![rule(
            "never-matches-xyz",
            Some("code-review"),
            ComplexityLevel::Complex,
            "claude-sonnet-4",
        )]));
        let result = c.classify(&CostRequestContext::new("hello").with_task_type("code-review"));
        assert_eq!(result.level, ComplexityLevel::Complex);
        assert!(result.reason.contains("task type"));
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let c = ComplexityClassifier::new(&config(vec![
            rule("hello", None, ComplexityLevel::Simple, "a"),
            rule("hello", None, ComplexityLevel::Expert, "b"),
        ]));
        assert_eq!(c.classify(&CostRequestContext::new("hello")).model, "a");
    }

    #[test]
    fn test_invalid_pattern_still_matches_task_type() {
        let c = ComplexityClassifier::new(&config(vec![rule(
            "([bad",
            Some("summarize"),
            ComplexityLevel::Simple,
            "claude-haiku-3-5",
        )]));
        let result = c.classify(&CostRequestContext::new("([bad").with_task_type("summarize"));
        assert_eq!(result.level, ComplexityLevel::Simple);
        let fallback = c.classify(&CostRequestContext::new("([bad"));
        assert!(fallback.reason.starts_with("heuristic"));
    }

    #[test]
    fn test_short_prompt_is_simple() {
        let c = ComplexityClassifier::new(&config(vec![]));
        let result = c.classify(&CostRequestContext::new("What is 2 + 2?"));
        assert_eq!(result.level, ComplexityLevel::Simple);
        assert_eq!(result.model, "claude-haiku-3-5");
    }

    #[test]
    fn test_analytical_verb_pushes_over_threshold() {
        let c = ComplexityClassifier::new(&config(vec![]));
        // 360 chars -> 90 tokens: simple on its own, moderate after x1.5.
        let plain = "a".repeat(360);
        assert_eq!(c.classify(&CostRequestContext::new(plain)).level, ComplexityLevel::Simple);

        let analytical = format!("explain {}", "a".repeat(352));
        let result = c.classify(&CostRequestContext::new(analytical));
        assert_eq!(result.level, ComplexityLevel::Moderate);
        assert_eq!(result.model, "gpt-4o-mini");
    }

    #[test]
    fn test_score_equal_to_threshold_goes_up_a_level() {
        let c = ComplexityClassifier::new(&config(vec![]));
        // Exactly 100 tokens with no signals.
        let result = c.classify(&CostRequestContext::new("z".repeat(400)));
        assert_eq!(result.level, ComplexityLevel::Moderate);
    }

    #[test]
    fn test_long_prompt_is_expert() {
        let c = ComplexityClassifier::new(&config(vec![]));
        let result = c.classify(&CostRequestContext::new("z".repeat(8000)));
        assert_eq!(result.level, ComplexityLevel::Expert);
        assert_eq!(result.model, "claude-opus-4");
    }

    #[test]
    fn test_model_for_level_prefers_rules() {
        let c = ComplexityClassifier::new(&config(vec![rule(
            "x",
            None,
            ComplexityLevel::Complex,
            "gpt-4o",
        )]));
        assert_eq!(c.model_for_level(ComplexityLevel::Complex), "gpt-4o");
        assert_eq!(c.model_for_level(ComplexityLevel::Expert), "claude-opus-4");
        assert_eq!(c.model_for_level(ComplexityLevel::Moderate), "gpt-4o-mini");
    }

    #[test]
    fn test_is_model_appropriate_uses_ladder() {
        let c = ComplexityClassifier::new(&config(vec![]));
        assert!(c.is_model_appropriate("claude-opus-4", ComplexityLevel::Complex));
        assert!(!c.is_model_appropriate("claude-haiku-3-5", ComplexityLevel::Expert));
        assert!(c.is_model_appropriate("my-local-model", ComplexityLevel::Expert));
    }
}
