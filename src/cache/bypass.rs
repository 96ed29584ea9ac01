//! Cache bypass conditions.

use regex::{Regex, RegexBuilder};

use crate::config::{BypassKind, CacheBypassCondition};
use crate::types::CostRequestContext;

enum Condition {
    TaskType(String),
    Model(String),
    Header(String),
    PromptPattern(Regex),
}

/// Compiled bypass conditions; any match skips both caches.
pub struct BypassRules {
    conditions: Vec<Condition>,
}

impl BypassRules {
    /// Compile conditions. Unparseable prompt patterns are dropped with a warning.
    pub fn new(conditions: &[CacheBypassCondition]) -> Self {
        let conditions = conditions
            .iter()
            .filter_map(|c| match c.kind {
                BypassKind::TaskType => Some(Condition::TaskType(c.value.clone())),
                BypassKind::Model => Some(Condition::Model(c.value.clone())),
                BypassKind::Header => Some(Condition::Header(c.value.to_ascii_lowercase())),
                BypassKind::PromptPattern => {
                    match RegexBuilder::new(&c.value).case_insensitive(true).build() {
                        Ok(re) => Some(Condition::PromptPattern(re)),
                        Err(e) => {
                            tracing::warn!(pattern = %c.value, error = %e, "dropping invalid bypass pattern");
                            None
                        }
                    }
                }
            })
            .collect();
        Self { conditions }
    }

    /// Whether `ctx` must skip caching.
    ///
    /// A header condition matches when the named header is present with a
    /// non-empty value; header names compare case-insensitively.
    pub fn matches(&self, ctx: &CostRequestContext) -> bool {
        self.conditions.iter().any(|c| match c {
            Condition::TaskType(t) => ctx.task_type.as_deref() == Some(t.as_str()),
            Condition::Model(m) => ctx.model.as_deref() == Some(m.as_str()),
            Condition::Header(name) => ctx
                .headers
                .iter()
                .any(|(k, v)| k.eq_ignore_ascii_case(name) && !v.is_empty()),
            Condition::PromptPattern(re) => re.is_match(&ctx.prompt),
        })
    }

    /// Number of active conditions.
    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    /// Whether no condition is active.
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cond(kind: BypassKind, value: &str) -> CacheBypassCondition {
        CacheBypassCondition {
            kind,
            value: value.into(),
        }
    }

    #[test]
    fn test_task_type_and_model_match_exactly() {
        let rules = BypassRules::new(&[
            cond(BypassKind::TaskType, "realtime"),
            cond(BypassKind::Model, "gpt-4o"),
        ]);
        assert!(rules.matches(&CostRequestContext::new("x").with_task_type("realtime")));
        assert!(rules.matches(&CostRequestContext::new("x").with_model("gpt-4o")));
        assert!(!rules.matches(&CostRequestContext::new("x").with_model("gpt-4o-mini")));
    }

    #[test]
    fn test_header_requires_non_empty_value() {
        let rules = BypassRules::new(&[cond(BypassKind::Header, "X-No-Cache")]);
        assert!(rules.matches(&CostRequestContext::new("x").with_header("x-no-cache", "1")));
        assert!(!rules.matches(&CostRequestContext::new("x").with_header("x-no-cache", "")));
        assert!(!rules.matches(&CostRequestContext::new("x")));
    }

    #[test]
    fn test_prompt_pattern_is_case_insensitive() {
        let rules = BypassRules::new(&[cond(BypassKind::PromptPattern, r"\bcurrent time\b")]);
        assert!(rules.matches(&CostRequestContext::new("What is the CURRENT TIME?")));
        assert!(!rules.matches(&CostRequestContext::new("what time zone")));
    }

    #[test]
    fn test_invalid_pattern_is_dropped() {
        let rules = BypassRules::new(&[cond(BypassKind::PromptPattern, "([unclosed")]);
        assert!(rules.is_empty());
        assert!(!rules.matches(&CostRequestContext::new("([unclosed")));
    }
}
