//! In-flight request coalescing.
//!
//! ## Responsibility
//! Let concurrent identical requests (same model and prompt) share one
//! upstream call. The first caller registers a future; later callers within
//! the window receive a clone of the same shared future.
//!
//! ## Guarantees
//! - At most one pending entry per key
//! - [`Deduplicator::coalesce`] checks and registers atomically per key
//! - The registered work is driven by its own task, so dropping any waiter,
//!   including the one that registered it, never cancels it
//! - An entry is removed `window` after its future settles, success or error
//!
//! ## NOT Responsible For
//! - Caching results beyond the window (that belongs to the caches)
//! - Collision resistance: keys use a non-cryptographic hash

use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::time::Instant;

use crate::config::DeduplicationConfig;

/// A cloneable handle to an in-flight result.
pub type SharedResult<T> = Shared<BoxFuture<'static, T>>;

/// Coalescing key for a model and prompt.
pub fn dedup_key(prompt: &str, model: &str) -> String {
    let mut hasher = DefaultHasher::new();
    model.hash(&mut hasher);
    ":".hash(&mut hasher);
    prompt.hash(&mut hasher);
    format!("dedup:{:016x}", hasher.finish())
}

/// Outcome of [`Deduplicator::coalesce`].
pub enum Coalesced<T: Clone> {
    /// This caller registered the work.
    Leader(SharedResult<T>),
    /// Identical work was already in flight.
    Joined(SharedResult<T>),
}

impl<T: Clone> Coalesced<T> {
    /// The shared future, regardless of role.
    pub fn into_future(self) -> SharedResult<T> {
        match self {
            Coalesced::Leader(f) | Coalesced::Joined(f) => f,
        }
    }

    /// Whether this caller joined existing work.
    pub fn is_joined(&self) -> bool {
        matches!(self, Coalesced::Joined(_))
    }
}

struct Pending<T: Clone> {
    id: u64,
    future: SharedResult<T>,
    registered_at: Instant,
}

/// Tracks in-flight futures keyed by [`dedup_key`].
///
/// Registration spawns a driver task, so it must happen inside a Tokio
/// runtime.
pub struct Deduplicator<T: Clone + Send + Sync + 'static> {
    pending: Arc<DashMap<String, Pending<T>>>,
    window: Duration,
    next_id: AtomicU64,
}

impl<T: Clone + Send + Sync + 'static> Deduplicator<T> {
    /// Deduplicator with the given coalescing window.
    pub fn new(window: Duration) -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            window,
            next_id: AtomicU64::new(0),
        }
    }

    /// Build from the `deduplication` section of the cache policy.
    pub fn from_config(config: &DeduplicationConfig) -> Self {
        Self::new(Duration::from_millis(config.window_ms))
    }

    /// Coalescing window.
    pub fn window(&self) -> Duration {
        self.window
    }

    fn is_fresh(&self, pending: &Pending<T>) -> bool {
        pending.registered_at.elapsed() <= self.window
    }

    /// The in-flight future for this request, if registered within the window.
    pub fn is_duplicate(&self, prompt: &str, model: &str) -> Option<SharedResult<T>> {
        let key = dedup_key(prompt, model);
        let (found, stale_id) = match self.pending.get(&key) {
            None => return None,
            Some(p) if self.is_fresh(&p) => (Some(p.future.clone()), None),
            Some(p) => (None, Some(p.id)),
        };
        if let Some(id) = stale_id {
            self.pending.remove_if(&key, |_, p| p.id == id);
        }
        found
    }

    /// Register `future` for this request and return its shared handle.
    ///
    /// Replaces any existing entry for the key.
    pub fn register<F>(&self, prompt: &str, model: &str, future: F) -> SharedResult<T>
    where
        F: Future<Output = T> + Send + 'static,
    {
        let key = dedup_key(prompt, model);
        let (id, shared) = self.prepare(future);
        self.pending.insert(
            key.clone(),
            Pending {
                id,
                future: shared.clone(),
                registered_at: Instant::now(),
            },
        );
        self.spawn_driver(key, id, shared.clone());
        shared
    }

    /// Join in-window work for this request, or register `make()` as new work.
    ///
    /// The check and the registration happen under the key's shard lock, so
    /// two racing callers cannot both become leaders.
    pub fn coalesce<F, M>(&self, prompt: &str, model: &str, make: M) -> Coalesced<T>
    where
        M: FnOnce() -> F,
        F: Future<Output = T> + Send + 'static,
    {
        let key = dedup_key(prompt, model);
        let entry = self.pending.entry(key.clone());
        if let Entry::Occupied(occupied) = &entry {
            if self.is_fresh(occupied.get()) {
                return Coalesced::Joined(occupied.get().future.clone());
            }
        }

        let (id, shared) = self.prepare(make());
        let pending = Pending {
            id,
            future: shared.clone(),
            registered_at: Instant::now(),
        };
        match entry {
            Entry::Occupied(mut occupied) => {
                occupied.insert(pending);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(pending);
            }
        }
        self.spawn_driver(key, id, shared.clone());
        Coalesced::Leader(shared)
    }

    fn prepare<F>(&self, future: F) -> (u64, SharedResult<T>)
    where
        F: Future<Output = T> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        (id, future.boxed().shared())
    }

    fn spawn_driver(&self, key: String, id: u64, shared: SharedResult<T>) {
        crate::metrics::set_dedup_pending(self.pending.len());
        let pending = Arc::clone(&self.pending);
        let window = self.window;
        tokio::spawn(async move {
            shared.await;
            tokio::time::sleep(window).await;
            pending.remove_if(&key, |_, p| p.id == id);
            crate::metrics::set_dedup_pending(pending.len());
        });
    }

    /// Entries still inside their window.
    pub fn pending_count(&self) -> usize {
        self.pending.iter().filter(|p| self.is_fresh(p.value())).count()
    }

    /// Forget every entry. In-flight work keeps running for its waiters.
    pub fn clear(&self) {
        self.pending.clear();
        crate::metrics::set_dedup_pending(0);
    }
}
