//! Upstream model abstraction.
//!
//! The engine never talks to a provider directly; callers hand it an
//! [`Upstream`] and the engine decides which model to ask, how often to
//! retry, and where to fall back.
//!
//! [`EchoUpstream`] answers locally and is used by the demo binary and the
//! tests.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::routing::estimate_tokens;
use crate::types::TokenUsage;

/// One completion call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamRequest {
    /// Model to call.
    pub model: String,
    /// Prompt text.
    pub prompt: String,
    /// Output cap chosen by the complexity rule, if any.
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

/// A successful completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamResponse {
    /// Completion text.
    pub content: String,
    /// Model that actually answered.
    pub model: String,
    /// Billed token counts.
    pub usage: TokenUsage,
}

/// A failed completion, identified by a provider-neutral code.
///
/// `Clone` so a coalesced call can hand the same failure to every waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct UpstreamError {
    /// Code matched against `retryable_errors` (e.g. `"RATE_LIMIT_EXCEEDED"`).
    pub code: String,
    /// Human-readable detail.
    pub message: String,
}

impl UpstreamError {
    /// Code used when an attempt exceeds the fallback timeout.
    pub const TIMEOUT: &'static str = "TIMEOUT";

    /// Build an error.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Timeout error for `model` after `after`.
    pub fn timeout(model: &str, after: Duration) -> Self {
        Self::new(
            Self::TIMEOUT,
            format!("{model} did not answer within {}ms", after.as_millis()),
        )
    }
}

/// A model provider.
///
/// Implementations must be `Send + Sync`; the engine holds them as
/// `Arc<dyn Upstream>` and may call them from several tasks at once.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Run one completion.
    async fn complete(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError>;
}

/// Echoes the prompt back after a fixed delay.
///
/// Usage is estimated at four characters per token for both directions.
#[derive(Debug, Clone)]
pub struct EchoUpstream {
    delay: Duration,
}

impl EchoUpstream {
    /// Echo with a 10 ms delay.
    pub fn new() -> Self {
        Self::with_delay(Duration::from_millis(10))
    }

    /// Echo with a custom delay.
    pub fn with_delay(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for EchoUpstream {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Upstream for EchoUpstream {
    async fn complete(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError> {
        tokio::time::sleep(self.delay).await;
        let content = format!("[{}] {}", request.model, request.prompt);
        let usage = TokenUsage::new(estimate_tokens(&request.prompt), estimate_tokens(&content));
        Ok(UpstreamResponse {
            content,
            model: request.model,
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_echo_upstream_reports_model_and_usage() {
        let upstream = EchoUpstream::new();
        let response = upstream
            .complete(UpstreamRequest {
                model: "claude-haiku".into(),
                prompt: "abcdefgh".into(),
                max_tokens: None,
            })
            .await
            .expect("test: echo never fails");
        assert_eq!(response.model, "claude-haiku");
        assert_eq!(response.content, "[claude-haiku] abcdefgh");
        assert_eq!(response.usage.input_tokens, 2);
        assert!(response.usage.output_tokens > 2);
    }

    #[test]
    fn test_upstream_error_display_includes_code() {
        let err = UpstreamError::timeout("m", Duration::from_millis(250));
        assert_eq!(err.code, UpstreamError::TIMEOUT);
        assert_eq!(err.to_string(), "TIMEOUT: m did not answer within 250ms");
    }
}
