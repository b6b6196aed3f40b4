//! # Tandem Core
//!
//! Request-mediating engine that runs two LLM workers in tandem over a
//! vector-embedded knowledge graph:
//!
//! - **Speaker**: the user-facing worker whose tokens stream to the client
//! - **Executive**: the background worker that evaluates the Speaker against
//!   stored knowledge and may interject corrective material mid-stream
//! - **Knowledge Graph**: typed `TagCategory | Tag | Topic | Knowledge` nodes
//!   with cosine vector indexes, served by Neo4j
//! - **Semantic Retrieval**: k-NN over node embeddings plus hybrid
//!   semantic+structural queries
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tandem_core::{
//!     KnowledgeTools, LocalEmbedder, Neo4jStore, Orchestrator, OrchestratorConfig,
//! };
//!
//! let store = Arc::new(Neo4jStore::connect("bolt://localhost:7687", "neo4j", "password", 768).await?);
//! store.schema_init().await?;
//!
//! let embedder = Arc::new(LocalEmbedder::new("nomic-embed-text-v1.5", 768));
//! let tools = Arc::new(KnowledgeTools::new(store, embedder));
//!
//! let orchestrator = Orchestrator::new(tools, speaker, executive, OrchestratorConfig::default());
//! let mut events = orchestrator.stream_events(request);
//! ```
//!
//! ## Feature Flags
//!
//! - `embeddings` (default): local embedding generation with fastembed

// ============================================================================
// MODULES
// ============================================================================

pub mod graph;
pub mod knowledge;
pub mod llm;
pub mod orchestrator;
pub mod sse;
pub mod workers;

pub mod embeddings;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// Graph store layer
pub use graph::{
    AlterOutcome, CreateNodeSpec, EdgeSpec, GraphStore, HybridHit, KnowledgeError, Neo4jStore,
    NodeChange, NodeKind, NodeRef, Result, ScoredNode, StructuralQuery, BELONGS_TO, QUERY_ROW_CAP,
};

#[cfg(feature = "embeddings")]
pub use embeddings::LocalEmbedder;
pub use embeddings::{
    cosine_similarity, mean_pool, shape, Embedding, EmbeddingError, EmbeddingProvider,
};

// Knowledge tools (the closed contract layer over the store)
pub use knowledge::{
    KnowledgeDocument, KnowledgeItem, KnowledgeTools, NodeCreated, ToolCall, TopicHit,
};

// LLM adapter seam
pub use llm::{
    extract_json, ChatBackend, ChatMessage, ChatParams, Delta, LlmError, OpenAiBackend,
    ToolCallChunk,
};

// Workers
pub use workers::{EvalAction, EvalVerdict, Executive, Speaker};

// Orchestrator
pub use orchestrator::{
    ChatRequest, Orchestrator, OrchestratorConfig, OrchestratorError, OutEvent,
    DEFAULT_REEVAL_STRIDE,
};

// SSE wire schema
pub use sse::{
    done_frame, estimate_tokens, frame, ChatCompletion, ChatCompletionChunk, ChunkChoice,
    ChunkDelta, ChunkFactory, CompletionChoice, CompletionMessage, Usage,
};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding model name understood by [`LocalEmbedder`]
pub const DEFAULT_EMBEDDING_MODEL: &str = "nomic-embed-text-v1.5";

/// Default embedding dimension `D`
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 768;
