//! Local Semantic Embeddings
//!
//! Uses fastembed for local ONNX inference. The model is initialized lazily on
//! first use and cached for the process lifetime; the gateway shares a single
//! instance across all requests.

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::{Mutex, MutexGuard, OnceLock};

use super::{shape, Embedding, EmbeddingError, EmbeddingProvider};

/// Maximum text length in bytes for embedding (truncated if longer)
pub const MAX_TEXT_LENGTH: usize = 8192;

/// Truncate to at most `max` bytes without splitting a character
fn truncate_to_boundary(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Get the default cache directory for fastembed models.
/// Uses FASTEMBED_CACHE_PATH env var, or falls back to platform cache directory.
fn get_cache_dir() -> std::path::PathBuf {
    if let Ok(path) = std::env::var("FASTEMBED_CACHE_PATH") {
        return std::path::PathBuf::from(path);
    }

    if let Some(proj_dirs) = directories::ProjectDirs::from("ai", "tandem", "core") {
        return proj_dirs.cache_dir().join("fastembed");
    }

    if let Some(base_dirs) = directories::BaseDirs::new() {
        return base_dirs.home_dir().join(".cache/tandem/fastembed");
    }

    std::path::PathBuf::from(".fastembed_cache")
}

/// Resolve a configured model name to a fastembed model.
/// Unknown names fall back to nomic-embed-text-v1.5.
fn resolve_model(name: &str) -> EmbeddingModel {
    match name {
        "nomic-embed-text-v1.5" | "nomic-ai/nomic-embed-text-v1.5" => {
            EmbeddingModel::NomicEmbedTextV15
        }
        "all-MiniLM-L6-v2" | "sentence-transformers/all-MiniLM-L6-v2" => {
            EmbeddingModel::AllMiniLML6V2
        }
        "bge-small-en-v1.5" | "BAAI/bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
        other => {
            tracing::warn!(
                "Unknown embedding model '{}', falling back to nomic-embed-text-v1.5",
                other
            );
            EmbeddingModel::NomicEmbedTextV15
        }
    }
}

/// Local embedding provider backed by fastembed.
///
/// Initialization is lazy and idempotent: the first `embed` call downloads and
/// warms the model, later calls reuse it. A failed initialization is sticky
/// and surfaces as [`EmbeddingError::Unavailable`] on every call.
pub struct LocalEmbedder {
    model_name: String,
    dimensions: usize,
    model: OnceLock<Result<Mutex<TextEmbedding>, String>>,
}

impl LocalEmbedder {
    /// Create a provider for `model_name`, shaping every vector to `dimensions`.
    pub fn new(model_name: impl Into<String>, dimensions: usize) -> Self {
        Self {
            model_name: model_name.into(),
            dimensions,
            model: OnceLock::new(),
        }
    }

    /// The configured model name
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    fn get_model(&self) -> Result<MutexGuard<'_, TextEmbedding>, EmbeddingError> {
        let result = self.model.get_or_init(|| {
            let cache_dir = get_cache_dir();
            if let Err(e) = std::fs::create_dir_all(&cache_dir) {
                tracing::warn!("Failed to create cache directory {:?}: {}", cache_dir, e);
            }

            let options = InitOptions::new(resolve_model(&self.model_name))
                .with_show_download_progress(true)
                .with_cache_dir(cache_dir);

            TextEmbedding::try_new(options).map(Mutex::new).map_err(|e| {
                format!(
                    "Failed to initialize embedding model '{}': {}. \
                    Ensure ONNX runtime is available and model files can be downloaded.",
                    self.model_name, e
                )
            })
        });

        match result {
            Ok(model) => model
                .lock()
                .map_err(|e| EmbeddingError::Unavailable(format!("Lock poisoned: {}", e))),
            Err(err) => Err(EmbeddingError::Unavailable(err.clone())),
        }
    }

    /// Eagerly initialize the model (downloads if necessary)
    pub fn warm(&self) -> Result<(), EmbeddingError> {
        self.get_model().map(|_| ())
    }
}

impl EmbeddingProvider for LocalEmbedder {
    fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        if text.is_empty() {
            return Err(EmbeddingError::InvalidInput(
                "Text cannot be empty".to_string(),
            ));
        }

        let mut model = self.get_model()?;

        let text = truncate_to_boundary(text, MAX_TEXT_LENGTH);

        let mut embeddings = model
            .embed(vec![text], None)
            .map_err(|e| EmbeddingError::Unavailable(e.to_string()))?;

        if embeddings.is_empty() {
            return Err(EmbeddingError::Unavailable(
                "No embedding generated".to_string(),
            ));
        }

        Ok(Embedding::new(shape(embeddings.remove(0), self.dimensions)))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

// ============================================================================
// TESTS
// ============================================================================
