//! Bounded entry store shared by the exact and semantic caches.
//!
//! One mutex guards the map, the recency bookkeeping, and the counters, so a
//! reader never observes an entry mid-eviction.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::entry::CacheEntry;

struct Slot {
    entry: CacheEntry,
    /// Monotonic insertion order; breaks similarity ties.
    inserted: u64,
    /// Monotonic access order; breaks `last_accessed_at` ties.
    touched: u64,
}

#[derive(Default)]
struct StoreInner {
    slots: HashMap<String, Slot>,
    seq: u64,
    hits: u64,
    misses: u64,
}

impl StoreInner {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn touch(&mut self, key: &str, now: DateTime<Utc>) -> Option<CacheEntry> {
        let seq = self.next_seq();
        let slot = self.slots.get_mut(key)?;
        slot.entry.hit_count += 1;
        slot.entry.last_accessed_at = now;
        slot.touched = seq;
        Some(slot.entry.clone())
    }

    fn evict_lru(&mut self) -> Option<String> {
        let victim = self
            .slots
            .iter()
            .min_by_key(|(_, s)| (s.entry.last_accessed_at, s.touched))
            .map(|(k, _)| k.clone())?;
        self.slots.remove(&victim);
        Some(victim)
    }
}

/// LRU-by-access-time store with lazy expiry.
pub(crate) struct EntryStore {
    inner: Mutex<StoreInner>,
    max_entries: usize,
}

/// Lookup counters and size of a store.
pub(crate) struct StoreStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub bytes: usize,
}

impl EntryStore {
    pub(crate) fn new(max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            max_entries,
        }
    }

    pub(crate) fn get_at(&self, key: &str, now: DateTime<Utc>) -> Option<CacheEntry> {
        let mut inner = self.inner.lock();
        let expired = match inner.slots.get(key) {
            None => {
                inner.misses += 1;
                return None;
            }
            Some(slot) => slot.entry.is_expired_at(now),
        };
        if expired {
            inner.slots.remove(key);
            inner.misses += 1;
            return None;
        }
        inner.hits += 1;
        inner.touch(key, now)
    }

    /// Insert `entry`, evicting the least recently accessed entry first when
    /// full. Returns the evicted key, if any.
    pub(crate) fn insert(&self, key: String, entry: CacheEntry) -> Option<String> {
        if self.max_entries == 0 {
            return None;
        }
        let mut inner = self.inner.lock();
        let evicted = if !inner.slots.contains_key(&key) && inner.slots.len() >= self.max_entries
        {
            inner.evict_lru()
        } else {
            None
        };
        let seq = inner.next_seq();
        inner.slots.insert(
            key,
            Slot {
                entry,
                inserted: seq,
                touched: seq,
            },
        );
        evicted
    }

    pub(crate) fn remove(&self, key: &str) -> bool {
        self.inner.lock().slots.remove(key).is_some()
    }

    /// Drop every entry and reset the counters.
    pub(crate) fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.slots.clear();
        inner.hits = 0;
        inner.misses = 0;
    }

    pub(crate) fn prune_at(&self, now: DateTime<Utc>) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.slots.len();
        inner.slots.retain(|_, s| !s.entry.is_expired_at(now));
        before - inner.slots.len()
    }

    /// Linear scan for the live entry scoring strictly above `threshold`.
    ///
    /// Expired entries met during the scan are removed. Equal scores go to
    /// the entry inserted first. A found entry counts as a hit and is
    /// touched; otherwise the lookup counts as a miss.
    pub(crate) fn best_match_at<F>(
        &self,
        now: DateTime<Utc>,
        threshold: f64,
        score: F,
    ) -> Option<(CacheEntry, f64)>
    where
        F: Fn(&CacheEntry) -> Option<f64>,
    {
        let mut inner = self.inner.lock();
        inner.slots.retain(|_, s| !s.entry.is_expired_at(now));

        let mut best: Option<(&str, u64, f64)> = None;
        for (key, slot) in &inner.slots {
            let Some(similarity) = score(&slot.entry) else {
                continue;
            };
            if similarity <= threshold {
                continue;
            }
            let better = match best {
                None => true,
                Some((_, inserted, s)) => {
                    similarity > s || (similarity == s && slot.inserted < inserted)
                }
            };
            if better {
                best = Some((key.as_str(), slot.inserted, similarity));
            }
        }
        let best = best.map(|(k, _, s)| (k.to_string(), s));

        match best {
            Some((key, similarity)) => {
                inner.hits += 1;
                let mut entry = inner.touch(&key, now)?;
                entry.similarity = Some(similarity);
                Some((entry, similarity))
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    pub(crate) fn stats(&self) -> StoreStats {
        let inner = self.inner.lock();
        StoreStats {
            hits: inner.hits,
            misses: inner.misses,
            entries: inner.slots.len(),
            bytes: inner.slots.values().map(|s| s.entry.approx_bytes()).sum(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }
}
