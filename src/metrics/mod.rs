//! Prometheus metrics for the cost engine.
//!
//! ## Usage
//!
//! Call [`init_metrics`] once at process startup. The helper functions
//! (`inc_decision`, `inc_cache_lookup`, …) are no-ops if `init_metrics` was
//! never called, so the engine is always safe to run and observability
//! simply degrades gracefully.
//!
//! Per-request records, rollups, and the JSONL sink live in [`collector`].
//!
//! ## Metrics Exposed
//!
//! | Name | Type | Labels |
//! |------|------|--------|
//! | `cost_engine_decisions_total` | Counter | `action` |
//! | `cost_engine_cache_lookups_total` | Counter | `cache`, `result` |
//! | `cost_engine_tokens_total` | Counter | `tier` |
//! | `cost_engine_alerts_total` | Counter | `level` |
//! | `cost_engine_upstream_duration_seconds` | Histogram | `model` |
//! | `cost_engine_dedup_pending` | Gauge | none |

pub mod collector;

use crate::CostEngineError;
use prometheus::{
    core::Collector, CounterVec, Encoder, HistogramOpts, HistogramVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

pub use collector::{
    CostRollup, JsonlMetricsSink, MetricRecord, MetricsCollector, MetricsSink, ModelRollup,
    RollupPeriod, SinkError,
};

// ── Internal metrics bundle ────────────────────────────────────────────────

/// All Prometheus metrics for the engine, bundled together so they can be
/// stored in a single [`OnceLock`] and initialised atomically.
pub struct Metrics {
    /// Prometheus registry that owns all metric descriptors.
    pub registry: Registry,
    /// Routing decisions by action (`cache_hit`, `dispatch`, `throttled`, `rejected`).
    pub decisions_total: CounterVec,
    /// Cache lookups by cache (`exact`, `semantic`, `dedup`) and result.
    pub cache_lookups_total: CounterVec,
    /// Tokens recorded against the budget, by tier.
    pub tokens_total: CounterVec,
    /// Alerts recorded, by level.
    pub alerts_total: CounterVec,
    /// Upstream call latency, by model.
    pub upstream_duration: HistogramVec,
    /// Requests currently registered with the deduplicator.
    pub dedup_pending: IntGauge,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

fn register<C: Collector + Clone + 'static>(
    registry: &Registry,
    collector: Result<C, prometheus::Error>,
) -> Result<C, CostEngineError> {
    let collector =
        collector.map_err(|e| CostEngineError::Other(format!("metrics init failed: {e}")))?;
    registry
        .register(Box::new(collector.clone()))
        .map_err(|e| CostEngineError::Other(format!("metrics registration failed: {e}")))?;
    Ok(collector)
}

fn build(prefix: &str) -> Result<Metrics, CostEngineError> {
    let registry = Registry::new();
    let name = |n: &str| format!("{prefix}_{n}");

    let decisions_total = register(
        &registry,
        CounterVec::new(
            Opts::new(name("decisions_total"), "Routing decisions by action"),
            &["action"],
        ),
    )?;
    let cache_lookups_total = register(
        &registry,
        CounterVec::new(
            Opts::new(name("cache_lookups_total"), "Cache lookups by cache and result"),
            &["cache", "result"],
        ),
    )?;
    let tokens_total = register(
        &registry,
        CounterVec::new(
            Opts::new(name("tokens_total"), "Tokens recorded against the budget"),
            &["tier"],
        ),
    )?;
    let alerts_total = register(
        &registry,
        CounterVec::new(Opts::new(name("alerts_total"), "Budget alerts by level"), &["level"]),
    )?;
    let upstream_duration = register(
        &registry,
        HistogramVec::new(
            HistogramOpts::new(name("upstream_duration_seconds"), "Upstream call latency"),
            &["model"],
        ),
    )?;
    let dedup_pending = register(
        &registry,
        IntGauge::new(name("dedup_pending"), "In-flight deduplicated requests"),
    )?;

    Ok(Metrics {
        registry,
        decisions_total,
        cache_lookups_total,
        tokens_total,
        alerts_total,
        upstream_duration,
        dedup_pending,
    })
}

// ── Initialisation ─────────────────────────────────────────────────────────

/// Initialise all Prometheus metrics and register them with a private registry.
///
/// Calling it a second time is a no-op (returns `Ok(())`).
///
/// # Errors
///
/// Returns [`CostEngineError::Other`] if metric construction or registry
/// registration fails (e.g., duplicate descriptor names).
///
/// # Panics
///
/// This function never panics.
pub fn init_metrics() -> Result<(), CostEngineError> {
    if METRICS.get().is_some() {
        return Ok(());
    }
    let bundle = build("cost_engine")?;
    // A racing initialiser builds identical descriptors; first one wins.
    let _ = METRICS.set(bundle);
    Ok(())
}

fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

// ── Public helper functions ────────────────────────────────────────────────

/// Count one routing decision.
///
/// No-op if metrics have not been initialised.
pub fn inc_decision(action: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.decisions_total.get_metric_with_label_values(&[action]) {
            c.inc();
        }
    }
}

/// Count one cache lookup as a hit or a miss.
///
/// No-op if metrics have not been initialised.
pub fn inc_cache_lookup(cache: &str, hit: bool) {
    if let Some(m) = metrics() {
        let result = if hit { "hit" } else { "miss" };
        if let Ok(c) = m
            .cache_lookups_total
            .get_metric_with_label_values(&[cache, result])
        {
            c.inc();
        }
    }
}

/// Add recorded tokens for a tier.
///
/// No-op if metrics have not been initialised.
pub fn inc_tokens(tier: &str, tokens: u64) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.tokens_total.get_metric_with_label_values(&[tier]) {
            c.inc_by(tokens as f64);
        }
    }
}

/// Count one recorded alert.
///
/// No-op if metrics have not been initialised.
pub fn inc_alert(level: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.alerts_total.get_metric_with_label_values(&[level]) {
            c.inc();
        }
    }
}

/// Record the latency of one upstream call.
///
/// No-op if metrics have not been initialised.
///
/// # Panics
///
/// This function never panics.
pub fn record_upstream_latency(model: &str, d: Duration) {
    if let Some(m) = metrics() {
        if let Ok(h) = m.upstream_duration.get_metric_with_label_values(&[model]) {
            h.observe(d.as_secs_f64());
        }
    }
}

/// Set the in-flight deduplication gauge.
///
/// No-op if metrics have not been initialised.
pub fn set_dedup_pending(pending: usize) {
    if let Some(m) = metrics() {
        m.dedup_pending
            .set(i64::try_from(pending).unwrap_or(i64::MAX));
    }
}

/// Gather all registered metrics as a raw list of metric families.
///
/// Returns an empty `Vec` if metrics have not been initialised.
///
/// # Panics
///
/// This function never panics.
pub fn gather() -> Vec<prometheus::proto::MetricFamily> {
    metrics().map_or_else(Vec::new, |m| m.registry.gather())
}

/// Gather and encode all metrics in the Prometheus text exposition format.
///
/// Returns an empty string if metrics have not been initialised or if
/// encoding fails.
///
/// # Panics
///
/// This function never panics.
pub fn gather_metrics() -> String {
    let families = gather();
    if families.is_empty() {
        return String::new();
    }
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// A structured snapshot of the decision and cache counters.
#[derive(Debug, Default)]
pub struct MetricsSummary {
    /// Decision counts keyed by action.
    pub decisions: HashMap<String, u64>,
    /// Lookup counts keyed by `"cache:result"`.
    pub cache_lookups: HashMap<String, u64>,
}

fn label<'a>(metric: &'a prometheus::proto::Metric, name: &str) -> &'a str {
    metric
        .get_label()
        .iter()
        .find(|l| l.get_name() == name)
        .map_or("unknown", |l| l.get_value())
}

/// Return a structured summary of current counter values.
///
/// Returns a zeroed [`MetricsSummary`] if metrics have not been initialised.
///
/// # Panics
///
/// This function never panics.
pub fn get_metrics_summary() -> MetricsSummary {
    let Some(m) = metrics() else {
        return MetricsSummary::default();
    };
    let mut summary = MetricsSummary::default();

    for family in m.decisions_total.collect() {
        for metric in family.get_metric() {
            let value = metric.get_counter().get_value() as u64;
            summary
                .decisions
                .insert(label(metric, "action").to_string(), value);
        }
    }
    for family in m.cache_lookups_total.collect() {
        for metric in family.get_metric() {
            let key = format!("{}:{}", label(metric, "cache"), label(metric, "result"));
            let value = metric.get_counter().get_value() as u64;
            summary.cache_lookups.insert(key, value);
        }
    }
    summary
}
