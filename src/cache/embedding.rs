//! Prompt embeddings for the semantic cache.
//!
//! The default [`HashProjectionEmbedder`] is a deterministic bag-of-words
//! projection: cheap, dependency-free, and good enough to catch prompts that
//! differ only in case, spacing, or trailing words. Swap in a model-backed
//! embedder through [`TextEmbedder`] when real semantic recall matters.

/// Turns text into a fixed-dimension vector.
pub trait TextEmbedder: Send + Sync {
    /// Embed `text`. The result has exactly [`dimension`](Self::dimension) entries.
    fn embed(&self, text: &str) -> Vec<f64>;

    /// Length of every vector this embedder produces.
    fn dimension(&self) -> usize;

    /// Identifier that changes whenever the projection changes.
    fn version(&self) -> &str;
}

/// Default embedding width.
pub const DEFAULT_DIMENSION: usize = 128;

/// Order-sensitive hashed bag-of-words, L2-normalised.
///
/// Each whitespace-separated lowercase word hashes to one slot
/// (`h = h * 31 + char` modulo the dimension) and adds `1 / (i + 1)` there,
/// where `i` is the word's position. Empty input yields the zero vector.
#[derive(Debug, Clone, Copy)]
pub struct HashProjectionEmbedder {
    dimension: usize,
}

impl HashProjectionEmbedder {
    /// Embedder with `dimension` slots; zero is raised to one.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn slot(&self, word: &str) -> usize {
        let dim = self.dimension as u64;
        let hash = word
            .chars()
            .fold(0u64, |h, c| (h.wrapping_mul(31).wrapping_add(c as u64)) % dim);
        hash as usize
    }
}

impl Default for HashProjectionEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

impl TextEmbedder for HashProjectionEmbedder {
    fn embed(&self, text: &str) -> Vec<f64> {
        let mut vector = vec![0.0; self.dimension];
        let normalized = text.trim().to_lowercase();
        for (i, word) in normalized.split_whitespace().enumerate() {
            vector[self.slot(word)] += 1.0 / (i as f64 + 1.0);
        }

        let norm = vector.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn version(&self) -> &str {
        "hash-projection-v1"
    }
}

/// Cosine similarity in `[-1, 1]`.
///
/// Vectors of different length, or with a zero norm, score `0.0`.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut na, mut nb) = (0.0, 0.0, 0.0);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    (dot / (na.sqrt() * nb.sqrt())).clamp(-1.0, 1.0)
}
