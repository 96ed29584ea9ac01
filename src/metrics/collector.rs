//! Per-request cost records, rollups, and the JSONL sink.
//!
//! ## Responsibility
//! Buffer one [`MetricRecord`] per handled request, aggregate the buffer
//! into hourly, daily, or weekly [`CostRollup`]s on demand, and flush it to
//! a [`MetricsSink`].
//!
//! ## Guarantees
//! - The buffer is drained only after the sink reports success; records
//!   added during a persist are kept for the next one
//! - The buffer holds at most `capacity` records; past that the oldest are
//!   dropped, so a collector without a sink stays bounded
//! - Once cache counters have been merged, rollups report their hit rate
//! - The JSONL sink writes one newline-terminated object per record into
//!   `metrics-YYYY-MM-DD.jsonl`, appending across calls
//!
//! ## NOT Responsible For
//! - Prometheus counters (those live in the parent module)
//! - Retention or compaction of written files

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::cache::CacheStats;
use crate::types::{ComplexityLevel, PriorityTier};

/// Records kept in memory before the oldest are dropped.
pub const DEFAULT_BUFFER_CAPACITY: usize = 10_000;

/// One handled request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricRecord {
    /// When the request finished.
    pub timestamp: DateTime<Utc>,
    /// Model that served it (the cached response's model on a hit).
    pub model: String,
    /// Tokens billed; zero for cache hits.
    pub tokens: u64,
    /// USD cost; zero for cache hits.
    pub cost: f64,
    /// End-to-end latency.
    pub latency_ms: u64,
    /// Caller-supplied task type.
    #[serde(default)]
    pub task_type: Option<String>,
    /// Assigned tier.
    pub priority: PriorityTier,
    /// Served from a cache or a coalesced in-flight request.
    pub cache_hit: bool,
    /// Assigned level; `null` for cache hits, which skip classification.
    #[serde(default)]
    pub complexity: Option<ComplexityLevel>,
}

/// Rollup window ending now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RollupPeriod {
    /// Last hour.
    Hourly,
    /// Last 24 hours.
    Daily,
    /// Last seven days.
    Weekly,
}

impl RollupPeriod {
    /// Window length.
    pub fn duration(self) -> Duration {
        match self {
            RollupPeriod::Hourly => Duration::hours(1),
            RollupPeriod::Daily => Duration::days(1),
            RollupPeriod::Weekly => Duration::weeks(1),
        }
    }
}

/// Per-model slice of a rollup.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRollup {
    /// Requests.
    pub requests: u64,
    /// Tokens.
    pub tokens: u64,
    /// USD cost.
    pub cost: f64,
    /// Mean latency.
    pub avg_latency_ms: f64,
}

/// Aggregate over one window.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CostRollup {
    /// End of the window.
    pub timestamp: DateTime<Utc>,
    /// Window kind.
    pub period: RollupPeriod,
    /// Requests in the window.
    pub total_requests: u64,
    /// Fraction of cache lookups that hit, from the merged cache counters
    /// when any lookups were counted, else from the window's records.
    pub cache_hit_rate: f64,
    /// Mean complexity score (1-4) over classified requests.
    pub avg_complexity: f64,
    /// Tokens in the window.
    pub total_tokens: u64,
    /// USD cost in the window.
    pub total_cost: f64,
    /// Breakdown by model.
    pub by_model: BTreeMap<String, ModelRollup>,
    /// Requests by task type (`"unknown"` when absent).
    pub by_task_type: BTreeMap<String, u64>,
    /// Requests by tier.
    pub by_priority: BTreeMap<PriorityTier, u64>,
}

/// Sink write failures.
#[derive(Error, Debug)]
pub enum SinkError {
    /// Filesystem error.
    #[error("metrics sink {path}: {source}")]
    Io {
        /// File or directory involved.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },
    /// A record could not be encoded.
    #[error("metrics encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Destination for buffered records.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Write every record or fail as a whole.
    async fn write(&self, records: &[MetricRecord]) -> Result<(), SinkError>;
}

/// Appends records as JSON lines to `metrics-YYYY-MM-DD.jsonl` in a directory.
pub struct JsonlMetricsSink {
    dir: PathBuf,
}

impl JsonlMetricsSink {
    /// Sink writing into `dir`, created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// File a record stamped `at` lands in.
    pub fn path_for(&self, at: DateTime<Utc>) -> PathBuf {
        self.dir
            .join(format!("metrics-{}.jsonl", at.format("%Y-%m-%d")))
    }
}

#[async_trait]
impl MetricsSink for JsonlMetricsSink {
    async fn write(&self, records: &[MetricRecord]) -> Result<(), SinkError> {
        let mut by_file: BTreeMap<PathBuf, String> = BTreeMap::new();
        for record in records {
            let line = serde_json::to_string(record)?;
            let buf = by_file.entry(self.path_for(record.timestamp)).or_default();
            buf.push_str(&line);
            buf.push('\n');
        }

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| SinkError::Io {
                path: self.dir.display().to_string(),
                source,
            })?;

        for (path, content) in by_file {
            let io_err = |source| SinkError::Io {
                path: path.display().to_string(),
                source,
            };
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .map_err(io_err)?;
            file.write_all(content.as_bytes()).await.map_err(io_err)?;
            file.flush().await.map_err(io_err)?;
        }
        Ok(())
    }
}

#[derive(Default)]
struct Buffer {
    records: VecDeque<MetricRecord>,
    /// Records dropped for capacity since the collector was built.
    evicted: u64,
}

/// Buffers records and produces rollups.
pub struct MetricsCollector {
    buffer: Mutex<Buffer>,
    capacity: usize,
    sink: Option<Box<dyn MetricsSink>>,
    cache_stats: Mutex<Option<CacheStats>>,
}

impl MetricsCollector {
    /// Collector that flushes to `sink`.
    pub fn new(sink: Box<dyn MetricsSink>) -> Self {
        Self::build(Some(sink), DEFAULT_BUFFER_CAPACITY)
    }

    /// Collector with nowhere to flush; [`persist`](Self::persist) is a
    /// no-op and the buffer acts as a ring of the latest records.
    pub fn in_memory() -> Self {
        Self::build(None, DEFAULT_BUFFER_CAPACITY)
    }

    /// Bound the buffer to `capacity` records (at least one).
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    fn build(sink: Option<Box<dyn MetricsSink>>, capacity: usize) -> Self {
        Self {
            buffer: Mutex::new(Buffer::default()),
            capacity,
            sink,
            cache_stats: Mutex::new(None),
        }
    }

    /// Buffer one record, dropping the oldest when full.
    pub fn record(&self, record: MetricRecord) {
        let mut buffer = self.buffer.lock();
        if buffer.records.len() >= self.capacity {
            buffer.records.pop_front();
            buffer.evicted += 1;
            if buffer.evicted.is_power_of_two() {
                tracing::debug!(
                    evicted = buffer.evicted,
                    capacity = self.capacity,
                    "metrics buffer full; dropping oldest records"
                );
            }
        }
        buffer.records.push_back(record);
    }

    /// Buffered record count.
    pub fn record_count(&self) -> usize {
        self.buffer.lock().records.len()
    }

    /// Records dropped for capacity so far.
    pub fn evicted_count(&self) -> u64 {
        self.buffer.lock().evicted
    }

    /// Copy of the buffer, oldest first.
    pub fn records(&self) -> Vec<MetricRecord> {
        self.buffer.lock().records.iter().cloned().collect()
    }

    /// Drop the buffer without writing it.
    pub fn clear(&self) {
        self.buffer.lock().records.clear();
    }

    /// Remember the latest cache counters; later rollups take their hit
    /// rate from them.
    pub fn merge_cache_stats(&self, stats: CacheStats) {
        *self.cache_stats.lock() = Some(stats);
    }

    /// Most recently merged cache counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache_stats.lock().unwrap_or_default()
    }

    /// Aggregate the buffered records for the window ending now.
    pub fn rollup(&self, period: RollupPeriod) -> CostRollup {
        self.rollup_at(period, Utc::now())
    }

    /// Aggregate records with `now - period < timestamp <= now`.
    pub fn rollup_at(&self, period: RollupPeriod, now: DateTime<Utc>) -> CostRollup {
        let start = now - period.duration();
        let merged_hit_rate = self.cache_stats.lock().and_then(|c| c.hit_rate());
        let buffer = self.buffer.lock();
        let in_window = buffer
            .records
            .iter()
            .filter(|r| r.timestamp > start && r.timestamp <= now);

        let mut rollup = CostRollup {
            timestamp: now,
            period,
            total_requests: 0,
            cache_hit_rate: 0.0,
            avg_complexity: 0.0,
            total_tokens: 0,
            total_cost: 0.0,
            by_model: BTreeMap::new(),
            by_task_type: BTreeMap::new(),
            by_priority: BTreeMap::new(),
        };
        let (mut hits, mut complexity_sum, mut classified) = (0u64, 0u64, 0u64);
        let mut latency_sums: BTreeMap<String, u64> = BTreeMap::new();

        for r in in_window {
            rollup.total_requests += 1;
            rollup.total_tokens += r.tokens;
            rollup.total_cost += r.cost;
            if r.cache_hit {
                hits += 1;
            }
            if let Some(level) = r.complexity {
                complexity_sum += u64::from(level.score());
                classified += 1;
            }
            let model = rollup.by_model.entry(r.model.clone()).or_default();
            model.requests += 1;
            model.tokens += r.tokens;
            model.cost += r.cost;
            *latency_sums.entry(r.model.clone()).or_default() += r.latency_ms;

            let task = r.task_type.clone().unwrap_or_else(|| "unknown".to_string());
            *rollup.by_task_type.entry(task).or_default() += 1;
            *rollup.by_priority.entry(r.priority).or_default() += 1;
        }

        for (model, slice) in rollup.by_model.iter_mut() {
            let sum = latency_sums.get(model).copied().unwrap_or(0);
            slice.avg_latency_ms = sum as f64 / slice.requests.max(1) as f64;
        }
        if let Some(rate) = merged_hit_rate {
            rollup.cache_hit_rate = rate;
        } else if rollup.total_requests > 0 {
            rollup.cache_hit_rate = hits as f64 / rollup.total_requests as f64;
        }
        if classified > 0 {
            rollup.avg_complexity = complexity_sum as f64 / classified as f64;
        }
        rollup
    }

    /// Write the buffer to the sink, then drain what was written.
    ///
    /// Returns the number of records written (zero without a sink).
    ///
    /// # Errors
    ///
    /// Returns the sink's error; the buffer is left intact.
    pub async fn persist(&self) -> Result<usize, SinkError> {
        let Some(sink) = &self.sink else {
            return Ok(0);
        };
        let (snapshot, evicted_before) = {
            let buffer = self.buffer.lock();
            (
                buffer.records.iter().cloned().collect::<Vec<_>>(),
                buffer.evicted,
            )
        };
        if snapshot.is_empty() {
            return Ok(0);
        }
        sink.write(&snapshot).await?;

        let written = snapshot.len();
        let mut buffer = self.buffer.lock();
        // Evictions during the write already removed part of the snapshot.
        let evicted_since = (buffer.evicted - evicted_before) as usize;
        let drained = written
            .saturating_sub(evicted_since)
            .min(buffer.records.len());
        buffer.records.drain(..drained);
        tracing::debug!(written, "metrics persisted");
        Ok(written)
    }
}
