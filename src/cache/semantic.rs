//! Similarity-matched response cache.
//!
//! ## Responsibility
//! Store responses alongside the embedding of the prompt that produced them
//! and serve a new prompt from the closest stored neighbour when the cosine
//! similarity clears the configured threshold.
//!
//! ## Guarantees
//! - Returns only entries scoring strictly above the threshold
//! - Among equal scores the entry inserted first wins
//! - Expired entries are never returned and are removed during the scan
//!
//! ## NOT Responsible For
//! - Model affinity: a match may come from a response produced by a
//!   different model than the one requested
//! - Sub-linear search; lookups scan every live entry

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::embedding::{cosine_similarity, HashProjectionEmbedder, TextEmbedder};
use super::entry::{CacheEntry, CacheStats, EntryKind};
use super::store::EntryStore;
use super::CacheError;
use crate::config::SemanticMatchConfig;
use crate::types::CachedResponse;

/// Storage key for a prompt in the semantic cache.
pub fn semantic_key(prompt: &str) -> String {
    let mut hasher = DefaultHasher::new();
    prompt.hash(&mut hasher);
    format!("sem_{:016x}", hasher.finish())
}

/// Embedding-indexed cache.
pub struct SemanticCache {
    store: EntryStore,
    ttl: Duration,
    threshold: f64,
    embedder: Arc<dyn TextEmbedder>,
}

impl SemanticCache {
    /// Build with the default hash projection embedder.
    pub fn new(config: &SemanticMatchConfig) -> Self {
        Self::with_embedder(config, Arc::new(HashProjectionEmbedder::default()))
    }

    /// Build with a caller-supplied embedder.
    pub fn with_embedder(config: &SemanticMatchConfig, embedder: Arc<dyn TextEmbedder>) -> Self {
        tracing::debug!(
            embedder = embedder.version(),
            dimension = embedder.dimension(),
            threshold = config.similarity_threshold,
            "semantic cache ready"
        );
        Self {
            store: EntryStore::new(config.max_entries),
            ttl: Duration::from_secs(config.ttl_seconds),
            threshold: config.similarity_threshold,
            embedder,
        }
    }

    /// Embed a prompt with this cache's embedder.
    pub fn embed(&self, prompt: &str) -> Vec<f64> {
        self.embedder.embed(prompt)
    }

    /// Best live entry with similarity strictly above the threshold.
    ///
    /// The returned entry carries the score in
    /// [`CacheEntry::similarity`].
    pub fn find_similar(&self, embedding: &[f64]) -> Option<CacheEntry> {
        self.find_similar_at(embedding, Utc::now())
    }

    /// [`find_similar`](Self::find_similar) against an explicit clock.
    pub fn find_similar_at(&self, embedding: &[f64], now: DateTime<Utc>) -> Option<CacheEntry> {
        let found = self
            .store
            .best_match_at(now, self.threshold, |entry| {
                entry.embedding().map(|e| cosine_similarity(embedding, e))
            })
            .map(|(entry, _)| entry);
        crate::metrics::inc_cache_lookup("semantic", found.is_some());
        if let Some(entry) = &found {
            tracing::debug!(
                key = %entry.key,
                similarity = entry.similarity.unwrap_or_default(),
                "semantic cache hit"
            );
        }
        found
    }

    /// Look up by storage key.
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        self.store.get_at(key, Utc::now())
    }

    /// Embed `prompt` and store `response` under [`semantic_key`].
    pub fn put(&self, prompt: &str, response: Arc<CachedResponse>) {
        let embedding = self.embed(prompt);
        self.put_embedded(prompt, embedding, response);
    }

    /// Store `response` with an embedding computed by the caller.
    pub fn put_embedded(&self, prompt: &str, embedding: Vec<f64>, response: Arc<CachedResponse>) {
        let key = semantic_key(prompt);
        let entry = CacheEntry::semantic(key.clone(), embedding, response, self.ttl, Utc::now());
        self.store.insert(key, entry);
    }

    /// Store a prepared entry.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::WrongEntryKind`] for an exact entry.
    pub fn set(&self, key: &str, mut entry: CacheEntry) -> Result<(), CacheError> {
        if !matches!(entry.kind, EntryKind::Semantic { .. }) {
            return Err(CacheError::WrongEntryKind {
                cache: "semantic",
                key: key.to_string(),
            });
        }
        entry.key = key.to_string();
        self.store.insert(key.to_string(), entry);
        Ok(())
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
        self.store.prune_at(Utc::now())
    }

    /// [`prune`](Self::prune) against an explicit clock.
    pub fn prune_at(&self, now: DateTime<Utc>) -> usize {
        self.store.prune_at(now)
    }

    /// Counters and size; exact fields are zero.
    pub fn stats(&self) -> CacheStats {
        let s = self.store.stats();
        CacheStats {
            semantic_hits: s.hits,
            semantic_misses: s.misses,
            total_entries: s.entries,
            memory_usage_bytes: s.bytes,
            ..CacheStats::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TokenUsage;

    fn config(threshold: f64) -> SemanticMatchConfig {
        SemanticMatchConfig {
            enabled: true,
            similarity_threshold: threshold,
            ttl_seconds: 60,
            max_entries: 16,
        }
    }

    fn response(content: &str) -> Arc<CachedResponse> {
        Arc::new(CachedResponse {
            content: content.into(),
            model: "claude-sonnet-4".into(),
            token_usage: TokenUsage::new(5, 5),
        })
    }

    #[test]
    fn test_semantic_key_is_stable_and_prefixed() {
        let key = semantic_key("hello");
        assert_eq!(key, semantic_key("hello"));
        assert!(key.starts_with("sem_"));
        assert_eq!(key.len(), 4 + 16);
    }

    #[test]
    fn test_find_similar_returns_near_duplicate() {
        let cache = SemanticCache::new(&config(0.9));
        cache.put("what is the capital of france", response("Paris"));

        let probe = cache.embed("What is the capital of France");
        let hit = cache.find_similar(&probe).expect("test: similar hit");
        assert_eq!(hit.response.content, "Paris");
        assert!(hit.similarity.expect("test: similarity") > 0.9);
    }

    #[test]
    fn test_find_similar_rejects_unrelated_prompt() {
        let cache = SemanticCache::new(&config(0.95));
        cache.put("translate this sentence into german", response("x"));
        let probe = cache.embed("list prime numbers under one hundred");
        assert!(cache.find_similar(&probe).is_none());
        assert_eq!(cache.stats().semantic_misses, 1);
    }

    #[test]
    fn test_identical_vector_at_threshold_one_is_not_a_hit() {
        let cache = SemanticCache::new(&config(1.0));
        cache.put("same prompt", response("x"));
        let probe = cache.embed("same prompt");
        assert!(cache.find_similar(&probe).is_none());
    }

    #[test]
    fn test_expired_entries_are_skipped_and_removed() {
        let cache = SemanticCache::new(&config(0.5));
        cache.put("hello world", response("x"));
        let probe = cache.embed("hello world");
        let later = Utc::now() + chrono::Duration::seconds(120);
        assert!(cache.find_similar_at(&probe, later).is_none());
        assert_eq!(cache.stats().total_entries, 0);
    }

    #[test]
    fn test_dimension_mismatch_scores_zero() {
        let cache = SemanticCache::new(&config(0.1));
        cache.put("hello world", response("x"));
        assert!(cache.find_similar(&[1.0, 0.0]).is_none());
    }

    #[test]
    fn test_set_rejects_exact_entry() {
        let cache = SemanticCache::new(&config(0.9));
        let entry = CacheEntry::exact("k", response("x"), Duration::from_secs(1), Utc::now());
        assert!(matches!(
            cache.set("k", entry),
            Err(CacheError::WrongEntryKind { .. })
        ));
    }
}
