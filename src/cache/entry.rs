//! Cache entries and statistics.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::CachedResponse;

/// Fixed per-entry overhead used by the byte-size estimate.
pub const ENTRY_OVERHEAD_BYTES: usize = 200;

/// Which cache an entry belongs to.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryKind {
    /// Keyed by SHA-256 of `model:prompt`.
    Exact,
    /// Keyed by prompt hash, matched by embedding similarity.
    Semantic {
        /// L2-normalised prompt embedding.
        embedding: Arc<[f64]>,
    },
}

/// One stored response with its access bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Lookup key.
    pub key: String,
    /// Exact or semantic.
    pub kind: EntryKind,
    /// Shared payload.
    pub response: Arc<CachedResponse>,
    /// Insertion time.
    pub created_at: DateTime<Utc>,
    /// Entry is logically absent once `now > expires_at`.
    pub expires_at: DateTime<Utc>,
    /// Successful lookups served by this entry.
    pub hit_count: u64,
    /// Last insertion or hit; drives LRU eviction.
    pub last_accessed_at: DateTime<Utc>,
    /// Similarity of the lookup that returned this entry (semantic only).
    pub similarity: Option<f64>,
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    // Keeps `expires_at > created_at` even for a zero TTL.
    let ttl = chrono::Duration::from_std(ttl)
        .unwrap_or(chrono::Duration::MAX)
        .max(chrono::Duration::milliseconds(1));
    now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl CacheEntry {
    /// Build an exact entry created at `now`.
    pub fn exact(
        key: impl Into<String>,
        response: Arc<CachedResponse>,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            key: key.into(),
            kind: EntryKind::Exact,
            response,
            created_at: now,
            expires_at: expiry(now, ttl),
            hit_count: 0,
            last_accessed_at: now,
            similarity: None,
        }
    }

    /// Build a semantic entry created at `now`.
    pub fn semantic(
        key: impl Into<String>,
        embedding: Vec<f64>,
        response: Arc<CachedResponse>,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            key: key.into(),
            kind: EntryKind::Semantic {
                embedding: embedding.into(),
            },
            response,
            created_at: now,
            expires_at: expiry(now, ttl),
            hit_count: 0,
            last_accessed_at: now,
            similarity: None,
        }
    }

    /// Whether the entry is logically absent at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Embedding of a semantic entry.
    pub fn embedding(&self) -> Option<&[f64]> {
        match &self.kind {
            EntryKind::Semantic { embedding } => Some(&embedding[..]),
            EntryKind::Exact => None,
        }
    }

    /// Approximate heap footprint: key + content (UTF-16 sized) + embedding + overhead.
    pub fn approx_bytes(&self) -> usize {
        let embedding = self.embedding().map_or(0, |e| e.len() * std::mem::size_of::<f64>());
        self.key.len() * 2 + self.response.content.len() * 2 + embedding + ENTRY_OVERHEAD_BYTES
    }
}

/// Hit/miss counters and size estimate for one or both caches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Exact cache hits.
    pub exact_hits: u64,
    /// Exact cache misses.
    pub exact_misses: u64,
    /// Semantic cache hits.
    pub semantic_hits: u64,
    /// Semantic cache misses.
    pub semantic_misses: u64,
    /// Stored entries, expired ones included until pruned.
    pub total_entries: usize,
    /// Approximate bytes held.
    pub memory_usage_bytes: usize,
}

impl CacheStats {
    /// Sum two stats values field by field.
    pub fn merge(self, other: CacheStats) -> CacheStats {
        CacheStats {
            exact_hits: self.exact_hits + other.exact_hits,
            exact_misses: self.exact_misses + other.exact_misses,
            semantic_hits: self.semantic_hits + other.semantic_hits,
            semantic_misses: self.semantic_misses + other.semantic_misses,
            total_entries: self.total_entries + other.total_entries,
            memory_usage_bytes: self.memory_usage_bytes + other.memory_usage_bytes,
        }
    }

    /// Hits over lookups across both caches, or `None` before any lookup.
    pub fn hit_rate(&self) -> Option<f64> {
        let hits = self.exact_hits + self.semantic_hits;
        let total = hits + self.exact_misses + self.semantic_misses;
        (total > 0).then(|| hits as f64 / total as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TokenUsage;

    fn response() -> Arc<CachedResponse> {
        Arc::new(CachedResponse {
            content: "abcd".into(),
            model: "m".into(),
            token_usage: TokenUsage::new(1, 1),
        })
    }

    #[test]
    fn test_zero_ttl_still_expires_after_creation() {
        let now = Utc::now();
        let entry = CacheEntry::exact("k", response(), Duration::ZERO, now);
        assert!(entry.expires_at > entry.created_at);
        assert!(!entry.is_expired_at(now));
    }

    #[test]
    fn test_entry_is_absent_only_after_expiry() {
        let now = Utc::now();
        let entry = CacheEntry::exact("k", response(), Duration::from_secs(10), now);
        assert!(!entry.is_expired_at(entry.expires_at));
        assert!(entry.is_expired_at(entry.expires_at + chrono::Duration::milliseconds(1)));
    }

    #[test]
    fn test_approx_bytes_counts_key_content_embedding_and_overhead() {
        let now = Utc::now();
        let exact = CacheEntry::exact("key", response(), Duration::from_secs(1), now);
        assert_eq!(exact.approx_bytes(), 3 * 2 + 4 * 2 + ENTRY_OVERHEAD_BYTES);

        let semantic =
            CacheEntry::semantic("key", vec![0.0; 4], response(), Duration::from_secs(1), now);
        assert_eq!(semantic.approx_bytes(), 3 * 2 + 4 * 2 + 32 + ENTRY_OVERHEAD_BYTES);
    }

    #[test]
    fn test_stats_merge_and_hit_rate() {
        let a = CacheStats {
            exact_hits: 3,
            exact_misses: 1,
            ..CacheStats::default()
        };
        let b = CacheStats {
            semantic_hits: 1,
            semantic_misses: 3,
            ..CacheStats::default()
        };
        let merged = a.merge(b);
        assert_eq!(merged.hit_rate(), Some(0.5));
        assert_eq!(CacheStats::default().hit_rate(), None);
    }
}
