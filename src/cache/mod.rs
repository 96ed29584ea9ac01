//! Response caching and request coalescing.
//!
//! ## Responsibility
//! Avoid paying for the same completion twice: [`ExactCache`] serves
//! byte-identical requests, [`SemanticCache`] serves near-identical prompts,
//! and [`Deduplicator`] folds concurrent identical requests into one
//! upstream call.
//!
//! ## Guarantees
//! - Every cache is bounded by its `max_entries`
//! - Expired entries are never served
//! - Cache problems surface as misses, never as request failures
//!
//! ## NOT Responsible For
//! - Deciding when to cache (that belongs to `middleware`)
//! - Persistence: all state is in-process

pub mod bypass;
pub mod dedup;
pub mod embedding;
pub mod entry;
pub mod exact;
pub mod semantic;
mod store;

use thiserror::Error;

pub use bypass::BypassRules;
pub use dedup::{dedup_key, Coalesced, Deduplicator, SharedResult};
pub use embedding::{cosine_similarity, HashProjectionEmbedder, TextEmbedder};
pub use entry::{CacheEntry, CacheStats, EntryKind};
pub use exact::{cache_key, ExactCache};
pub use semantic::{semantic_key, SemanticCache};

/// Errors from direct cache writes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// An entry of the other kind was offered to a cache.
    #[error("{cache} cache cannot store entry {key}: wrong entry kind")]
    WrongEntryKind {
        /// Cache that rejected the entry.
        cache: &'static str,
        /// Key the entry was offered under.
        key: String,
    },
}
