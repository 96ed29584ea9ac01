//! Exact-match response cache.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use super::entry::{CacheEntry, CacheStats, EntryKind};
use super::store::EntryStore;
use super::CacheError;
use crate::config::ExactMatchConfig;
use crate::types::CachedResponse;

/// Lowercase hex SHA-256 of `model:prompt`.
///
/// # Panics
///
/// This function never panics.
pub fn cache_key(model: &str, prompt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update(b":");
    hasher.update(prompt.as_bytes());
    hex::encode(hasher.finalize())
}

/// Bounded, TTL-expiring map from [`cache_key`] to response.
pub struct ExactCache {
    store: EntryStore,
    ttl: Duration,
}

impl ExactCache {
    /// Build from the `exactMatch` section of the cache policy.
    pub fn new(config: &ExactMatchConfig) -> Self {
        Self {
            store: EntryStore::new(config.max_entries),
            ttl: Duration::from_secs(config.ttl_seconds),
        }
    }

    /// Configured time-to-live for new entries.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up `key`. Expired entries count as a miss and are removed.
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        self.get_at(key, Utc::now())
    }

    /// [`get`](Self::get) against an explicit clock.
    pub fn get_at(&self, key: &str, now: DateTime<Utc>) -> Option<CacheEntry> {
        let hit = self.store.get_at(key, now);
        crate::metrics::inc_cache_lookup("exact", hit.is_some());
        if hit.is_some() {
            tracing::debug!(key = %key, "exact cache hit");
        }
        hit
    }

    /// Store a response under `key` with the configured TTL.
    pub fn put(&self, key: &str, response: Arc<CachedResponse>) {
        let entry = CacheEntry::exact(key, response, self.ttl, Utc::now());
        self.insert(entry);
    }

    /// Store a prepared entry.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::WrongEntryKind`] for a semantic entry.
    pub fn set(&self, key: &str, mut entry: CacheEntry) -> Result<(), CacheError> {
        if !matches!(entry.kind, EntryKind::Exact) {
            return Err(CacheError::WrongEntryKind {
                cache: "exact",
                key: key.to_string(),
            });
        }
        entry.key = key.to_string();
        self.insert(entry);
        Ok(())
    }

    fn insert(&self, entry: CacheEntry) {
        if let Some(evicted) = self.store.insert(entry.key.clone(), entry) {
            tracing::debug!(evicted = %evicted, "exact cache evicted least recently used entry");
        }
    }

    /// Remove `key`; returns whether it was present.
    pub fn delete(&self, key: &str) -> bool {
        self.store.remove(key)
    }

    /// Remove everything and reset counters.
    pub fn clear(&self) {
        self.store.clear();
    }

    /// Remove expired entries; returns how many.
    pub fn prune(&self) -> usize {
        self.prune_at(Utc::now())
    }

    /// [`prune`](Self::prune) against an explicit clock.
    pub fn prune_at(&self, now: DateTime<Utc>) -> usize {
        self.store.prune_at(now)
    }

    /// Counters and size; semantic fields are zero.
    pub fn stats(&self) -> CacheStats {
        let s = self.store.stats();
        CacheStats {
            exact_hits: s.hits,
            exact_misses: s.misses,
            total_entries: s.entries,
            memory_usage_bytes: s.bytes,
            ..CacheStats::default()
        }
    }
}
