//! Shared request and response types.
//!
//! ## Responsibility
//! Define the values threaded through every stage of a request: the
//! immutable [`CostRequestContext`], the classification enums, and the
//! cached payload handed between the caches and the caller.
//!
//! ## NOT Responsible For
//! - Policy documents (see `config`)
//! - Decision values (see `middleware`)

use std::collections::HashMap;
use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Budget and scheduling tier of a request.
///
/// Variants are declared lowest first, so the derived [`Ord`] agrees with
/// [`PriorityTier::weight`]: `Batch < Low < Normal < High < Critical`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum PriorityTier {
    /// Weight 0.
    Batch,
    /// Weight 25.
    Low,
    /// Weight 50.
    Normal,
    /// Weight 75.
    High,
    /// Weight 100.
    Critical,
}

impl PriorityTier {
    /// Every tier, highest priority first.
    pub const ALL: [PriorityTier; 5] = [
        PriorityTier::Critical,
        PriorityTier::High,
        PriorityTier::Normal,
        PriorityTier::Low,
        PriorityTier::Batch,
    ];

    /// Fixed integer weight used for admission comparisons.
    pub fn weight(self) -> u32 {
        match self {
            PriorityTier::Critical => 100,
            PriorityTier::High => 75,
            PriorityTier::Normal => 50,
            PriorityTier::Low => 25,
            PriorityTier::Batch => 0,
        }
    }

    /// Dense index in `0..5`, used for per-tier counter arrays.
    pub(crate) fn index(self) -> usize {
        match self {
            PriorityTier::Batch => 0,
            PriorityTier::Low => 1,
            PriorityTier::Normal => 2,
            PriorityTier::High => 3,
            PriorityTier::Critical => 4,
        }
    }

    /// Lowercase label, matching the serialized form.
    pub fn as_str(self) -> &'static str {
        match self {
            PriorityTier::Critical => "critical",
            PriorityTier::High => "high",
            PriorityTier::Normal => "normal",
            PriorityTier::Low => "low",
            PriorityTier::Batch => "batch",
        }
    }
}

impl fmt::Display for PriorityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Estimated difficulty of a request, driving model tier selection.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum ComplexityLevel {
    /// Short lookups and rewrites.
    Simple,
    /// The default level.
    Moderate,
    /// Multi-step or code-heavy work.
    Complex,
    /// Long analytical or design work.
    Expert,
}

impl ComplexityLevel {
    /// Numeric score (1 to 4) used when averaging complexity in rollups.
    pub fn score(self) -> u8 {
        match self {
            ComplexityLevel::Simple => 1,
            ComplexityLevel::Moderate => 2,
            ComplexityLevel::Complex => 3,
            ComplexityLevel::Expert => 4,
        }
    }

    /// Lowercase label, matching the serialized form.
    pub fn as_str(self) -> &'static str {
        match self {
            ComplexityLevel::Simple => "simple",
            ComplexityLevel::Moderate => "moderate",
            ComplexityLevel::Complex => "complex",
            ComplexityLevel::Expert => "expert",
        }
    }
}

impl fmt::Display for ComplexityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of a budget alert.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    /// Informational.
    Info,
    /// Approaching a limit.
    Warning,
    /// Close to a hard stop.
    Critical,
    /// At or past a hard stop.
    Emergency,
}

impl AlertLevel {
    /// Lowercase label, matching the serialized form.
    pub fn as_str(self) -> &'static str {
        match self {
            AlertLevel::Info => "info",
            AlertLevel::Warning => "warning",
            AlertLevel::Critical => "critical",
            AlertLevel::Emergency => "emergency",
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single input value threaded through every classifier.
///
/// Built once per inbound request and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostRequestContext {
    /// Prompt text sent to the model.
    pub prompt: String,
    /// Model the caller asked for, if any.
    #[serde(default)]
    pub model: Option<String>,
    /// Caller-defined task category (e.g. `"summarize"`).
    #[serde(default)]
    pub task_type: Option<String>,
    /// Originating system or team.
    #[serde(default)]
    pub source: Option<String>,
    /// Explicit priority; overrides every priority rule.
    #[serde(default)]
    pub priority: Option<PriorityTier>,
    /// Request headers, consulted by cache bypass conditions.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl CostRequestContext {
    /// Create a context holding only a prompt.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    /// Set the requested model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the task type.
    pub fn with_task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = Some(task_type.into());
        self
    }

    /// Set the source.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Set an explicit priority.
    pub fn with_priority(mut self, priority: PriorityTier) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Add a request header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Token counts reported for one completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    /// Prompt tokens.
    pub input_tokens: u64,
    /// Completion tokens.
    pub output_tokens: u64,
}

impl TokenUsage {
    /// Create a usage value.
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Input plus output.
    pub fn total(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

/// Immutable payload produced by a successful upstream call.
///
/// Stored behind an `Arc` so the exact and semantic caches can share one
/// allocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedResponse {
    /// Completion text.
    pub content: String,
    /// Model that produced the completion.
    pub model: String,
    /// Token usage of the original call.
    pub token_usage: TokenUsage,
}
