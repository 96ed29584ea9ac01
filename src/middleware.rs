//! # Cost Engine
//!
//! ## Responsibility
//! Run every request through the cost pipeline:
//!
//! ```text
//! coalesce → exact cache → semantic cache → rate limit → budget admission
//!          → classify (priority, complexity, time) → dispatch
//!          → [upstream, with retry and fallback] → cache → record usage → metric
//! ```
//!
//! [`CostEngine::pre_request`] and [`CostEngine::post_request`] expose the
//! two halves for callers that make the upstream call themselves;
//! [`CostEngine::execute`] runs the whole lifecycle against an
//! [`Upstream`].
//!
//! ## Guarantees
//! - Cache lookups run before any budget or classification work
//! - A denied or throttled request never reaches the upstream and never
//!   holds budget
//! - Budget admission and reservation are one atomic step, so concurrent
//!   requests cannot overshoot the hard stop between them
//! - Alert delivery runs detached and never fails a request
//! - Identical concurrent requests share one upstream call; dropping one
//!   waiter never cancels the others
//!
//! ## NOT Responsible For
//! - Talking to providers (see [`Upstream`])
//! - Persisting cache or budget state across restarts

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::budget::{
    Admission, AdmissionCheck, AlertChannel, AlertEmitter, BudgetAlert, BudgetStatus,
    Reservation, TokenTracker,
};
use crate::cache::{
    cache_key, BypassRules, CacheStats, Deduplicator, ExactCache, SemanticCache,
    TextEmbedder,
};
use crate::config::CostOptimizationConfig;
use crate::metrics::{
    self, CostRollup, MetricRecord, MetricsCollector, MetricsSink, JsonlMetricsSink,
    RollupPeriod, SinkError,
};
use crate::resilience::{FallbackChain, RateLimitExceeded, RateLimiter, RetryPolicy};
use crate::routing::{
    estimate_tokens, ComplexityClassifier, ComplexityResult, PriorityClassifier, PriorityResult,
    TimeBasedRouter, TimePeriod,
};
use crate::types::{CachedResponse, ComplexityLevel, CostRequestContext, PriorityTier, TokenUsage};
use crate::upstream::{Upstream, UpstreamError, UpstreamRequest, UpstreamResponse};

// ============================================================================
// Decisions
// ============================================================================

/// Which cache served a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheSource {
    /// Byte-identical model and prompt.
    Exact,
    /// Embedding similarity above the threshold.
    Semantic,
}

/// A request answered from cache.
#[derive(Debug, Clone)]
pub struct CacheHit {
    /// Request id.
    pub request_id: Uuid,
    /// Cache that answered.
    pub source: CacheSource,
    /// Key of the entry that answered.
    pub cache_key: String,
    /// Stored response.
    pub response: Arc<CachedResponse>,
    /// Cosine similarity, for semantic hits.
    pub similarity: Option<f64>,
    /// Explicit priority, or the configured default tier.
    pub priority: PriorityTier,
    /// Human-readable explanation.
    pub reason: String,
}

/// A request cleared to call the upstream.
///
/// Holds a budget reservation: pass it to [`CostEngine::post_request`] on
/// success, or drop it to release the reservation.
#[derive(Debug)]
pub struct Dispatch {
    /// Request id.
    pub request_id: Uuid,
    /// Model to call.
    pub model: String,
    /// Complexity verdict.
    pub complexity: ComplexityResult,
    /// Priority verdict.
    pub priority: PriorityResult,
    /// Time period, when time-based routing is on.
    pub time_period: Option<TimePeriod>,
    /// Exact cache key to store the response under; `None` when the
    /// request bypasses the caches.
    pub cache_key: Option<String>,
    /// Prompt, kept for semantic storage.
    pub prompt: String,
    /// Caller task type.
    pub task_type: Option<String>,
    /// Tokens reserved: `ceil(chars/4) * 2`.
    pub estimated_tokens: u64,
    /// Estimated USD cost on `model`.
    pub estimated_cost: f64,
    /// Daily tokens left after this reservation.
    pub budget_remaining: u64,
    /// Output cap from the complexity rule.
    pub max_tokens: Option<u32>,
    /// Routing and budget warnings.
    pub warnings: Vec<String>,
    /// Admission verdict (`Allow` or `Warn`).
    pub admission: AdmissionCheck,
    started_at: Instant,
    embedding: Option<Vec<f64>>,
    reservation: Reservation,
}

/// A request refused by budget admission.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    /// Request id.
    pub request_id: Uuid,
    /// Tier the request was assessed at.
    pub priority: PriorityTier,
    /// Why admission failed.
    pub reason: String,
    /// Projected utilisation ratio that failed.
    pub utilization: f64,
    /// Daily tokens left.
    pub budget_remaining: u64,
}

/// Outcome of [`CostEngine::pre_request`].
#[derive(Debug)]
pub enum RoutingDecision {
    /// Serve the cached response.
    CacheHit(CacheHit),
    /// Call the upstream.
    Dispatch(Dispatch),
    /// The rate limiter refused the request.
    Throttled(RateLimitExceeded),
    /// Budget admission refused the request.
    Rejected(Rejection),
}

impl RoutingDecision {
    /// Label used for the decisions counter.
    pub fn action(&self) -> &'static str {
        match self {
            RoutingDecision::CacheHit(_) => "cache_hit",
            RoutingDecision::Dispatch(_) => "dispatch",
            RoutingDecision::Throttled(_) => "throttled",
            RoutingDecision::Rejected(_) => "rejected",
        }
    }
}

// ============================================================================
// Responses and errors
// ============================================================================

/// Where an [`EngineResponse`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSource {
    /// A fresh upstream call.
    Upstream,
    /// The exact cache.
    Exact,
    /// The semantic cache.
    Semantic,
    /// Another caller's in-flight request.
    Coalesced,
}

impl ResponseSource {
    /// Whether no upstream call was made for this caller.
    pub fn is_cache_hit(self) -> bool {
        self != ResponseSource::Upstream
    }
}

/// Final result of [`CostEngine::execute`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineResponse {
    /// Request id.
    pub request_id: Uuid,
    /// Completion text.
    pub content: String,
    /// Model that produced the completion.
    pub model: String,
    /// Token usage billed to this request; zero unless `source` is `Upstream`.
    pub usage: TokenUsage,
    /// USD cost billed to this request.
    pub cost: f64,
    /// Origin of the response.
    pub source: ResponseSource,
    /// Tier the request ran at.
    pub priority: PriorityTier,
    /// Complexity verdict; absent when a cache answered.
    pub complexity: Option<ComplexityLevel>,
    /// End-to-end latency.
    pub latency_ms: u64,
    /// Routing and budget warnings.
    pub warnings: Vec<String>,
}

/// Failures surfaced by [`CostEngine::execute`].
///
/// `Clone` so one coalesced failure reaches every waiter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Budget admission refused the request.
    #[error("budget exceeded for {priority} request: {reason}")]
    BudgetExceeded {
        /// Tier the request was assessed at.
        priority: PriorityTier,
        /// Why admission failed.
        reason: String,
        /// Projected utilisation ratio.
        utilization: f64,
    },
    /// The rate limiter refused the request.
    #[error("rate limited: {0}")]
    RateLimited(RateLimitExceeded),
    /// Every model in the fallback chain failed.
    #[error("upstream failed: {0}")]
    Upstream(UpstreamError),
    /// The last attempt timed out.
    #[error("upstream timed out: {0}")]
    Timeout(String),
    /// The request task itself failed.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<UpstreamError> for EngineError {
    fn from(e: UpstreamError) -> Self {
        if e.code == UpstreamError::TIMEOUT {
            EngineError::Timeout(e.message)
        } else {
            EngineError::Upstream(e)
        }
    }
}

type Outcome = Result<EngineResponse, EngineError>;

// ============================================================================
// Builder
// ============================================================================

/// Assembles a [`CostEngine`].
pub struct CostEngineBuilder {
    config: Arc<CostOptimizationConfig>,
    state_dir: Option<PathBuf>,
    embedder: Option<Arc<dyn TextEmbedder>>,
    metrics_sink: Option<Box<dyn MetricsSink>>,
    alert_channels: Option<Vec<Arc<dyn AlertChannel>>>,
}

impl CostEngineBuilder {
    /// Directory for default alert logs (`alerts/`) and metrics (`metrics/`).
    ///
    /// Without one, metrics stay in memory and file alert channels without
    /// a target write under `./alerts`.
    pub fn state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(dir.into());
        self
    }

    /// Replace the hash projection embedder.
    pub fn embedder(mut self, embedder: Arc<dyn TextEmbedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Send metric records to `sink` instead of the default.
    pub fn metrics_sink(mut self, sink: Box<dyn MetricsSink>) -> Self {
        self.metrics_sink = Some(sink);
        self
    }

    /// Deliver alerts to `channels` instead of those named in config.
    pub fn alert_channels(mut self, channels: Vec<Arc<dyn AlertChannel>>) -> Self {
        self.alert_channels = Some(channels);
        self
    }

    /// Build the engine.
    pub fn build(self) -> CostEngine {
        let config = self.config;
        let cache = &config.cache_policy;

        let semantic = match self.embedder {
            Some(embedder) => SemanticCache::with_embedder(&cache.semantic_match, embedder),
            None => SemanticCache::new(&cache.semantic_match),
        };

        let alert_dir = self
            .state_dir
            .as_ref()
            .map_or_else(|| PathBuf::from("alerts"), |d| d.join("alerts"));
        let alerts = match self.alert_channels {
            Some(channels) => AlertEmitter::with_channels(config.budget_alerts.clone(), channels),
            None => AlertEmitter::new(config.budget_alerts.clone(), &alert_dir),
        };

        let collector = match (self.metrics_sink, &self.state_dir) {
            (Some(sink), _) => MetricsCollector::new(sink),
            (None, Some(dir)) => MetricsCollector::new(Box::new(JsonlMetricsSink::new(
                dir.join("metrics"),
            ))),
            (None, None) => MetricsCollector::in_memory(),
        };

        info!(
            default_model = %config.complexity_router.default_model,
            cache_enabled = cache.enabled,
            time_routing = config.time_based_routing.enabled,
            rate_limit = config.rate_limit.enabled,
            "cost engine ready"
        );

        CostEngine {
            inner: Arc::new(EngineInner {
                bypass: BypassRules::new(&cache.bypass_conditions),
                exact: ExactCache::new(&cache.exact_match),
                semantic,
                dedup: Deduplicator::from_config(&cache.deduplication),
                complexity: ComplexityClassifier::new(&config.complexity_router),
                priority: PriorityClassifier::new(&config.priority_tiers),
                time_router: TimeBasedRouter::new(&config.time_based_routing),
                tracker: TokenTracker::new(
                    config.token_budget.clone(),
                    config.model_costs.clone(),
                ),
                alerts: Arc::new(alerts),
                collector,
                retry: RetryPolicy::new(&config.retry_policy),
                fallback: FallbackChain::new(&config.fallback_chain),
                rate_limiter: RateLimiter::new(config.rate_limit),
                config,
            }),
        }
    }
}

// ============================================================================
// Engine
// ============================================================================

struct EngineInner {
    config: Arc<CostOptimizationConfig>,
    bypass: BypassRules,
    exact: ExactCache,
    semantic: SemanticCache,
    dedup: Deduplicator<Outcome>,
    complexity: ComplexityClassifier,
    priority: PriorityClassifier,
    time_router: TimeBasedRouter,
    tracker: TokenTracker,
    alerts: Arc<AlertEmitter>,
    collector: MetricsCollector,
    retry: RetryPolicy,
    fallback: FallbackChain,
    rate_limiter: RateLimiter,
}

/// The cost-optimisation middleware.
///
/// Cheap to clone; clones share every cache, counter, and buffer.
#[derive(Clone)]
pub struct CostEngine {
    inner: Arc<EngineInner>,
}

impl CostEngine {
    /// Engine with default wiring for `config`.
    pub fn new(config: CostOptimizationConfig) -> Self {
        Self::builder(config).build()
    }

    /// Start building an engine for `config`.
    pub fn builder(config: impl Into<Arc<CostOptimizationConfig>>) -> CostEngineBuilder {
        CostEngineBuilder {
            config: config.into(),
            state_dir: None,
            embedder: None,
            metrics_sink: None,
            alert_channels: None,
        }
    }

    /// Configuration snapshot in force.
    pub fn config(&self) -> &CostOptimizationConfig {
        &self.inner.config
    }

    fn caches_enabled(&self) -> bool {
        self.inner.config.cache_policy.enabled
    }

    fn lookup_model<'a>(&'a self, ctx: &'a CostRequestContext) -> &'a str {
        ctx.model
            .as_deref()
            .unwrap_or(&self.inner.config.complexity_router.default_model)
    }

    // ── Pre-request ─────────────────────────────────────────────────────

    /// Decide how to handle `ctx`.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn pre_request(&self, ctx: &CostRequestContext) -> RoutingDecision {
        self.pre_request_at(ctx, Utc::now())
    }

    /// [`pre_request`](Self::pre_request) against an explicit wall clock.
    ///
    /// The clock drives cache expiry, time routing, and budget periods; the
    /// rate limiter always uses the runtime clock.
    pub fn pre_request_at(&self, ctx: &CostRequestContext, now: DateTime<Utc>) -> RoutingDecision {
        let decision = self.decide(ctx, now);
        metrics::inc_decision(decision.action());
        decision
    }

    fn decide(&self, ctx: &CostRequestContext, now: DateTime<Utc>) -> RoutingDecision {
        let inner = &*self.inner;
        let request_id = Uuid::new_v4();
        let policy = &inner.config.cache_policy;
        let cacheable = self.caches_enabled() && !inner.bypass.matches(ctx);
        let key = cache_key(self.lookup_model(ctx), &ctx.prompt);

        if cacheable && policy.exact_match.enabled {
            if let Some(entry) = inner.exact.get_at(&key, now) {
                return self.cache_hit(ctx, request_id, CacheSource::Exact, key, entry.response, None);
            }
        }

        let mut embedding = None;
        if cacheable && policy.semantic_match.enabled {
            let query = inner.semantic.embed(&ctx.prompt);
            if let Some(entry) = inner.semantic.find_similar_at(&query, now) {
                return self.cache_hit(
                    ctx,
                    request_id,
                    CacheSource::Semantic,
                    entry.key,
                    entry.response,
                    entry.similarity,
                );
            }
            embedding = Some(query);
        }

        if let Err(limited) = inner.rate_limiter.try_acquire() {
            debug!(request_id = %request_id, reason = %limited, "request throttled");
            return RoutingDecision::Throttled(limited);
        }

        let priority = inner.priority.assign(ctx);
        let estimated_tokens = estimate_tokens(&ctx.prompt).saturating_mul(2);

        let reservation = match inner.tracker.reserve_at(priority.tier, estimated_tokens, now) {
            Ok(reservation) => reservation,
            Err(check) => {
                self.raise_alert(check.budget_utilization * 100.0, now);
                let budget_remaining = inner.tracker.status_at(now).daily_remaining;
                warn!(
                    request_id = %request_id,
                    tier = %priority.tier,
                    utilization = check.utilization,
                    reason = %check.reason,
                    "request rejected by budget"
                );
                return RoutingDecision::Rejected(Rejection {
                    request_id,
                    priority: priority.tier,
                    reason: check.reason,
                    utilization: check.utilization,
                    budget_remaining,
                });
            }
        };
        let admission = reservation.check().clone();
        self.raise_alert(admission.budget_utilization * 100.0, now);

        let mut warnings = Vec::new();
        if admission.admission == Admission::Warn {
            warnings.push(admission.reason.clone());
        }

        let complexity = inner.complexity.classify(ctx);
        let mut model = complexity.model.clone();
        let mut time_period = None;

        if inner.config.time_based_routing.enabled {
            let timed = inner.time_router.route(Some(now));
            time_period = Some(timed.period);
            if complexity.level <= ComplexityLevel::Moderate {
                model = timed.model;
                warnings.push(format!("time-based routing: {}", timed.reason));
            }
        }

        if let Some(requested) = ctx.model.as_deref() {
            if inner.complexity.is_model_appropriate(requested, complexity.level) {
                model = requested.to_string();
            } else {
                warnings.push(format!(
                    "requested model {requested} may be insufficient for {} work; using {model}",
                    complexity.level
                ));
            }
        }

        let half = estimated_tokens / 2;
        let estimated_cost = inner.tracker.calculate_cost(half, half, &model);
        let budget_remaining = inner
            .tracker
            .status_at(now)
            .daily_remaining
            .saturating_sub(estimated_tokens);

        debug!(
            request_id = %request_id,
            model = %model,
            complexity = %complexity.level,
            tier = %priority.tier,
            estimated_tokens,
            "request dispatched"
        );

        RoutingDecision::Dispatch(Dispatch {
            request_id,
            max_tokens: complexity.max_tokens,
            model,
            complexity,
            priority,
            time_period,
            cache_key: cacheable.then_some(key),
            prompt: ctx.prompt.clone(),
            task_type: ctx.task_type.clone(),
            estimated_tokens,
            estimated_cost,
            budget_remaining,
            warnings,
            admission,
            started_at: Instant::now(),
            embedding,
            reservation,
        })
    }

    fn cache_hit(
        &self,
        ctx: &CostRequestContext,
        request_id: Uuid,
        source: CacheSource,
        cache_key: String,
        response: Arc<CachedResponse>,
        similarity: Option<f64>,
    ) -> RoutingDecision {
        let priority = ctx
            .priority
            .unwrap_or(self.inner.config.priority_tiers.default_tier);
        let reason = match (source, similarity) {
            (CacheSource::Semantic, Some(s)) => format!("semantic cache hit (similarity {s:.2})"),
            (CacheSource::Semantic, None) => "semantic cache hit".to_string(),
            (CacheSource::Exact, _) => "exact cache hit".to_string(),
        };
        self.inner.collector.record(MetricRecord {
            timestamp: Utc::now(),
            model: response.model.clone(),
            tokens: 0,
            cost: 0.0,
            latency_ms: 0,
            task_type: ctx.task_type.clone(),
            priority,
            cache_hit: true,
            complexity: None,
        });
        debug!(request_id = %request_id, key = %cache_key, reason = %reason, "served from cache");
        RoutingDecision::CacheHit(CacheHit {
            request_id,
            source,
            cache_key,
            response,
            similarity,
            priority,
            reason,
        })
    }

    /// Record a threshold alert for `percent` and deliver it in the
    /// background. Without a runtime the alert is recorded only.
    fn raise_alert(&self, percent: f64, now: DateTime<Utc>) {
        let Some(alert) = self.inner.alerts.check_threshold(percent, now) else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let emitter = Arc::clone(&self.inner.alerts);
                handle.spawn(async move { emitter.deliver(&alert).await });
            }
            Err(_) => warn!(alert_id = %alert.id, "no runtime; alert recorded but not delivered"),
        }
    }

    // ── Post-request ────────────────────────────────────────────────────

    /// Settle a dispatched request: commit its usage, cache the response,
    /// and record the metric.
    pub fn post_request(&self, dispatch: Dispatch, response: UpstreamResponse) -> EngineResponse {
        let inner = &*self.inner;
        let Dispatch {
            request_id,
            complexity,
            priority,
            cache_key,
            prompt,
            task_type,
            warnings,
            started_at,
            embedding,
            reservation,
            ..
        } = dispatch;

        let usage = response.usage;
        let cost = reservation.commit(usage.input_tokens, usage.output_tokens, &response.model);

        if let Some(key) = cache_key {
            let cached = Arc::new(CachedResponse {
                content: response.content.clone(),
                model: response.model.clone(),
                token_usage: usage,
            });
            let policy = &inner.config.cache_policy;
            if policy.exact_match.enabled {
                inner.exact.put(&key, Arc::clone(&cached));
            }
            if policy.semantic_match.enabled {
                let embedding = embedding.unwrap_or_else(|| inner.semantic.embed(&prompt));
                inner.semantic.put_embedded(&prompt, embedding, cached);
            }
        }

        let latency_ms = u64::try_from(started_at.elapsed().as_millis()).unwrap_or(u64::MAX);
        inner.collector.record(MetricRecord {
            timestamp: Utc::now(),
            model: response.model.clone(),
            tokens: usage.total(),
            cost,
            latency_ms,
            task_type,
            priority: priority.tier,
            cache_hit: false,
            complexity: Some(complexity.level),
        });

        EngineResponse {
            request_id,
            content: response.content,
            model: response.model,
            usage,
            cost,
            source: ResponseSource::Upstream,
            priority: priority.tier,
            complexity: Some(complexity.level),
            latency_ms,
            warnings,
        }
    }

    // ── Full lifecycle ──────────────────────────────────────────────────

    /// Run `ctx` end to end against `upstream`.
    ///
    /// Identical concurrent requests (same model and prompt, inside the
    /// deduplication window) share one upstream call.
    ///
    /// # Errors
    ///
    /// - [`EngineError::BudgetExceeded`] when admission denies the request
    /// - [`EngineError::RateLimited`] when the rate limiter refuses it
    /// - [`EngineError::Upstream`] / [`EngineError::Timeout`] when every
    ///   model in the fallback chain fails
    /// - [`EngineError::Internal`] when the request task panics
    pub async fn execute(
        &self,
        ctx: CostRequestContext,
        upstream: Arc<dyn Upstream>,
    ) -> Result<EngineResponse, EngineError> {
        let dedup_enabled = self.caches_enabled()
            && self.inner.config.cache_policy.deduplication.enabled
            && !self.inner.bypass.matches(&ctx);
        if !dedup_enabled {
            return self.run(ctx, upstream).await;
        }

        let started = Instant::now();
        let model_key = self.lookup_model(&ctx).to_string();
        let task_type = ctx.task_type.clone();
        let engine = self.clone();
        let prompt = ctx.prompt.clone();

        let coalesced = self.inner.dedup.coalesce(&prompt, &model_key, move || async move {
            tokio::spawn(async move { engine.run(ctx, upstream).await })
                .await
                .unwrap_or_else(|e| Err(EngineError::Internal(e.to_string())))
        });
        let joined = coalesced.is_joined();
        metrics::inc_cache_lookup("dedup", joined);
        if !joined {
            return coalesced.into_future().await;
        }

        let mut response = coalesced.into_future().await?;
        response.request_id = Uuid::new_v4();
        response.source = ResponseSource::Coalesced;
        response.usage = TokenUsage::default();
        response.cost = 0.0;
        response.latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.inner.collector.record(MetricRecord {
            timestamp: Utc::now(),
            model: response.model.clone(),
            tokens: 0,
            cost: 0.0,
            latency_ms: response.latency_ms,
            task_type,
            priority: response.priority,
            cache_hit: true,
            complexity: response.complexity,
        });
        debug!(request_id = %response.request_id, "joined in-flight request");
        Ok(response)
    }

    async fn run(&self, ctx: CostRequestContext, upstream: Arc<dyn Upstream>) -> Outcome {
        let started = Instant::now();
        let dispatch = match self.pre_request(&ctx) {
            RoutingDecision::CacheHit(hit) => {
                let source = match hit.source {
                    CacheSource::Exact => ResponseSource::Exact,
                    CacheSource::Semantic => ResponseSource::Semantic,
                };
                return Ok(EngineResponse {
                    request_id: hit.request_id,
                    content: hit.response.content.clone(),
                    model: hit.response.model.clone(),
                    usage: TokenUsage::default(),
                    cost: 0.0,
                    source,
                    priority: hit.priority,
                    complexity: None,
                    latency_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                    warnings: Vec::new(),
                });
            }
            RoutingDecision::Throttled(limited) => return Err(EngineError::RateLimited(limited)),
            RoutingDecision::Rejected(rejection) => {
                return Err(EngineError::BudgetExceeded {
                    priority: rejection.priority,
                    reason: rejection.reason,
                    utilization: rejection.utilization,
                })
            }
            RoutingDecision::Dispatch(dispatch) => dispatch,
        };

        let inner = &*self.inner;
        let result = inner
            .fallback
            .run(&dispatch.model, &inner.retry, |model| {
                let request = UpstreamRequest {
                    model,
                    prompt: dispatch.prompt.clone(),
                    max_tokens: dispatch.max_tokens,
                };
                let upstream = Arc::clone(&upstream);
                async move {
                    let model = request.model.clone();
                    let call_started = Instant::now();
                    let result = upstream.complete(request).await;
                    metrics::record_upstream_latency(&model, call_started.elapsed());
                    result
                }
            })
            .await;

        match result {
            Ok((response, served_by)) => {
                let mut dispatch = dispatch;
                if served_by != dispatch.model {
                    dispatch
                        .warnings
                        .push(format!("fell back from {} to {served_by}", dispatch.model));
                }
                Ok(self.post_request(dispatch, response))
            }
            Err(e) => {
                warn!(
                    request_id = %dispatch.request_id,
                    model = %dispatch.model,
                    error = %e,
                    "upstream failed; releasing reservation"
                );
                drop(dispatch);
                Err(e.into())
            }
        }
    }

    // ── Introspection and housekeeping ──────────────────────────────────

    /// Combined counters of both caches.
    pub fn cache_stats(&self) -> CacheStats {
        let stats = self.inner.exact.stats().merge(self.inner.semantic.stats());
        self.inner.collector.merge_cache_stats(stats);
        stats
    }

    /// Current budget summary.
    pub fn budget_status(&self) -> BudgetStatus {
        self.inner.tracker.status()
    }

    /// The token tracker, for direct usage recording.
    pub fn tracker(&self) -> &TokenTracker {
        &self.inner.tracker
    }

    /// The metrics buffer.
    pub fn collector(&self) -> &MetricsCollector {
        &self.inner.collector
    }

    /// Rollup of buffered metrics for the window ending now.
    pub fn rollup(&self, period: RollupPeriod) -> CostRollup {
        self.inner.collector.rollup(period)
    }

    /// Flush buffered metrics to the sink.
    ///
    /// # Errors
    ///
    /// Returns the sink's error; the buffer is kept for the next attempt.
    pub async fn persist_metrics(&self) -> Result<usize, SinkError> {
        self.inner.collector.persist().await
    }

    /// Empty both caches and the deduplication registry.
    pub fn reset_cache(&self) {
        self.inner.exact.clear();
        self.inner.semantic.clear();
        self.inner.dedup.clear();
        info!("caches reset");
    }

    /// Alert history, oldest first.
    pub fn alerts(&self) -> Vec<BudgetAlert> {
        self.inner.alerts.alerts()
    }

    /// Mark an alert acknowledged; returns whether it was found.
    pub fn acknowledge_alert(&self, id: Uuid) -> bool {
        self.inner.alerts.acknowledge(id)
    }

    /// Requests currently inside the deduplication window.
    pub fn pending_requests(&self) -> usize {
        self.inner.dedup.pending_count()
    }

    /// Drop expired entries from both caches; returns how many went.
    pub fn prune(&self) -> usize {
        let removed = self.inner.exact.prune() + self.inner.semantic.prune();
        if removed > 0 {
            debug!(removed, "expired cache entries pruned");
        }
        removed
    }

    /// Spawn a task that prunes the caches and persists metrics every
    /// `interval`. Abort the handle to stop it.
    pub fn spawn_maintenance(&self, interval: Duration) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                engine.prune();
                engine.cache_stats();
                if let Err(e) = engine.persist_metrics().await {
                    warn!(error = %e, "metrics persist failed; will retry next tick");
                }
            }
        })
    }
}
