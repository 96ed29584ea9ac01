//! Priority tier assignment.

use regex::{Regex, RegexBuilder};

use crate::config::{PriorityRule, PriorityTierConfig};
use crate::types::{CostRequestContext, PriorityTier};

/// Outcome of [`PriorityClassifier::assign`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityResult {
    /// Assigned tier.
    pub tier: PriorityTier,
    /// Human-readable explanation.
    pub reason: String,
}

/// Whether `a` outranks `b`.
pub fn is_higher_priority(a: PriorityTier, b: PriorityTier) -> bool {
    a.weight() > b.weight()
}

/// Assigns a [`PriorityTier`] from an explicit request value, the first
/// matching rule, or the default tier.
pub struct PriorityClassifier {
    rules: Vec<(Regex, PriorityRule)>,
    default_tier: PriorityTier,
}

impl PriorityClassifier {
    /// Compile the rule list. Rules with an invalid pattern are dropped.
    pub fn new(config: &PriorityTierConfig) -> Self {
        let rules = config
            .rules
            .iter()
            .filter_map(|rule| {
                match RegexBuilder::new(&rule.pattern).case_insensitive(true).build() {
                    Ok(re) => Some((re, rule.clone())),
                    Err(e) => {
                        tracing::warn!(pattern = %rule.pattern, error = %e, "dropping invalid priority rule");
                        None
                    }
                }
            })
            .collect();
        Self {
            rules,
            default_tier: config.default_tier,
        }
    }

    /// Assign a tier to `ctx`.
    ///
    /// A rule matches when its pattern matches the prompt and each of its
    /// `task_type` / `source` fields, when set, equals the request's.
    pub fn assign(&self, ctx: &CostRequestContext) -> PriorityResult {
        if let Some(tier) = ctx.priority {
            return PriorityResult {
                tier,
                reason: "explicitly set on request".to_string(),
            };
        }

        let field_ok = |want: &Option<String>, have: &Option<String>| match want {
            Some(w) => have.as_deref() == Some(w.as_str()),
            None => true,
        };

        for (re, rule) in &self.rules {
            if re.is_match(&ctx.prompt)
                && field_ok(&rule.task_type, &ctx.task_type)
                && field_ok(&rule.source, &ctx.source)
            {
                return PriorityResult {
                    tier: rule.tier,
                    reason: format!("rule match: \"{}\"", rule.pattern),
                };
            }
        }

        PriorityResult {
            tier: self.default_tier,
            reason: "default tier (no rules matched)".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(pattern: &str, task_type: Option<&str>, source: Option<&str>, tier: PriorityTier) -> PriorityRule {
        PriorityRule {
            pattern: pattern.into(),
            task_type: task_type.map(str::to_string),
            source: source.map(str::to_string),
            tier,
        }
    }

    fn classifier(rules: Vec<PriorityRule>) -> PriorityClassifier {
        PriorityClassifier::new(&PriorityTierConfig {
            rules,
            default_tier: PriorityTier::Normal,
        })
    }

    #[test]
    fn test_explicit_priority_wins_over_rules() {
        let c = classifier(vec![rule(".*", None, None, PriorityTier::Batch)]);
        let ctx = CostRequestContext::new("anything").with_priority(PriorityTier::Critical);
        assert_eq!(c.assign(&ctx).tier, PriorityTier::Critical);
    }

    #[test]
    fn test_rule_requires_pattern_and_specified_fields() {
        let c = classifier(vec![rule(
            "outage",
            Some("incident"),
            Some("pagerduty"),
            PriorityTier::Critical,
        )]);
        let full = CostRequestContext::new("OUTAGE in eu-west")
            .with_task_type("incident")
            .with_source("pagerduty");
        assert_eq!(c.assign(&full).tier, PriorityTier::Critical);

        let wrong_source = CostRequestContext::new("outage")
            .with_task_type("incident")
            .with_source("email");
        assert_eq!(c.assign(&wrong_source).tier, PriorityTier::Normal);

        let no_pattern = CostRequestContext::new("all good")
            .with_task_type("incident")
            .with_source("pagerduty");
        assert_eq!(c.assign(&no_pattern).tier, PriorityTier::Normal);
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let c = classifier(vec![
            rule("report", None, None, PriorityTier::Low),
            rule("report", None, None, PriorityTier::High),
        ]);
        assert_eq!(c.assign(&CostRequestContext::new("report")).tier, PriorityTier::Low);
    }

    #[test]
    fn test_default_tier_when_nothing_matches() {
        let c = classifier(vec![rule("nomatch", None, None, PriorityTier::High)]);
        let result = c.assign(&CostRequestContext::new("hello"));
        assert_eq!(result.tier, PriorityTier::Normal);
        assert!(result.reason.contains("default"));
    }

    #[test]
    fn test_is_higher_priority() {
        assert!(is_higher_priority(PriorityTier::Critical, PriorityTier::High));
        assert!(!is_higher_priority(PriorityTier::Batch, PriorityTier::Low));
        assert!(!is_higher_priority(PriorityTier::Normal, PriorityTier::Normal));
    }
}
