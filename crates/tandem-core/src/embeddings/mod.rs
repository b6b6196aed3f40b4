//! Semantic Embeddings Module
//!
//! Provides the text-to-vector capability the knowledge graph is built on.
//! The production implementation runs fastembed (ONNX-based) locally; no
//! external API calls required.
//!
//! The graph only ever sees vectors of exactly the configured dimension `D`:
//! raw model output is mean-pooled when token-level, then truncated or
//! zero-padded, with non-finite entries coerced to `0.0`.

#[cfg(feature = "embeddings")]
mod local;

#[cfg(feature = "embeddings")]
pub use local::LocalEmbedder;

use thiserror::Error;

/// Embedding error types
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum EmbeddingError {
    /// The underlying model failed to initialize or produce output.
    /// Callers treat embedding generation as optional: a node created while
    /// the provider is unavailable simply stays out of vector queries.
    #[error("embedding unavailable: {0}")]
    Unavailable(String),
    /// Invalid input (empty text)
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// A semantic embedding vector
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    /// The embedding vector, already shaped to the provider dimension
    pub vector: Vec<f32>,
}

impl Embedding {
    /// Create a new embedding from a vector
    pub fn new(vector: Vec<f32>) -> Self {
        Self { vector }
    }

    /// Dimension of the vector
    pub fn dimensions(&self) -> usize {
        self.vector.len()
    }
}

/// The text-to-vector seam consumed by the knowledge tools.
///
/// Implementations must be cheap to share (`Arc`) and safe to call from async
/// contexts; inference is synchronous the way fastembed inference is.
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding for `text`, shaped to exactly `dimensions()`.
    fn embed(&self, text: &str) -> std::result::Result<Embedding, EmbeddingError>;

    /// The fixed dimension `D` every produced vector has.
    fn dimensions(&self) -> usize;
}

// ============================================================================
// VECTOR SHAPING
// ============================================================================

/// Mean-pool a token-level `[T, D]` matrix into a single `D` vector.
///
/// Models that emit one vector per input token (shape `[1, T, D]`) are reduced
/// across the token axis before shaping. An empty matrix pools to an empty
/// vector.
pub fn mean_pool(token_vectors: &[Vec<f32>]) -> Vec<f32> {
    let rows = token_vectors.len();
    if rows == 0 {
        return Vec::new();
    }
    let dims = token_vectors[0].len();
    let mut pooled = vec![0.0_f32; dims];
    for row in token_vectors {
        for (acc, value) in pooled.iter_mut().zip(row.iter()) {
            *acc += value;
        }
    }
    for value in &mut pooled {
        *value /= rows as f32;
    }
    pooled
}

/// Force a raw model vector to exactly `d` entries.
///
/// Longer vectors are truncated, shorter ones zero-padded. Non-finite entries
/// (NaN, infinities) are coerced to `0.0` so cosine scoring stays defined.
pub fn shape(mut vector: Vec<f32>, d: usize) -> Vec<f32> {
    vector.truncate(d);
    vector.resize(d, 0.0);
    for value in &mut vector {
        if !value.is_finite() {
            *value = 0.0;
        }
    }
    vector
}

/// Compute cosine similarity between two vectors
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot_product = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot_product += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denominator = (norm_a * norm_b).sqrt();
    if denominator > 0.0 {
        dot_product / denominator
    } else {
        0.0
    }
}

// ============================================================================
// TESTS
// ============================================================================
