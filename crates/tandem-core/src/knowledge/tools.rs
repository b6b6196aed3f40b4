//! Knowledge Tools
//!
//! The closed tool set over the graph store. Every operation has explicit
//! argument and result shapes; the [`ToolCall`] tagged variant gives external
//! callers (and the debug surface) a single `dispatch` entry point.
//!
//! Embeddings are generated from node names at creation and regenerated on
//! rename. Embedding failure is not fatal: the node is created without one
//! and stays invisible to vector queries.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::embeddings::EmbeddingProvider;
use crate::graph::{
    AlterOutcome, CreateNodeSpec, EdgeSpec, GraphStore, HybridHit, KnowledgeError, NodeChange,
    NodeKind, NodeRef, Result, ScoredNode, StructuralQuery,
};

/// Default result count for vector search
pub const DEFAULT_SEARCH_K: usize = 10;

/// Default minimum similarity for vector search
pub const DEFAULT_MIN_SCORE: f32 = 0.7;

/// Result of a node creation
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeCreated {
    pub kind: NodeKind,
    pub name: String,
    /// Internal driver id; never serialized to external callers
    #[serde(skip)]
    pub id: i64,
    /// Whether the node got an embedding (false means it is excluded from
    /// vector queries)
    pub embedded: bool,
}

// ============================================================================
// TOOL CALLS
// ============================================================================

/// The closed set of knowledge tools as a tagged variant, dispatched by
/// [`KnowledgeTools::dispatch`]. Wire names carry the `knowledge_` prefix.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "tool")]
pub enum ToolCall {
    #[serde(rename = "knowledge_create_node", rename_all = "camelCase")]
    CreateNode {
        node_type: NodeKind,
        name: String,
        #[serde(default)]
        description: String,
        #[serde(default)]
        summary: Option<String>,
        /// Parent names; the parent kind is the hierarchy parent of `node_type`
        #[serde(default)]
        belongs_to: Vec<String>,
        #[serde(default)]
        extra: BTreeMap<String, Value>,
    },
    #[serde(rename = "knowledge_create_edge", rename_all = "camelCase")]
    CreateEdge {
        source_type: NodeKind,
        source_names: Vec<String>,
        target_type: NodeKind,
        target_names: Vec<String>,
        relationship_type: String,
        #[serde(default)]
        description: String,
    },
    #[serde(rename = "knowledge_alter", rename_all = "camelCase")]
    Alter {
        node_type: NodeKind,
        id: i64,
        #[serde(default)]
        delete: bool,
        #[serde(default)]
        fields: BTreeMap<String, Value>,
    },
    #[serde(rename = "knowledge_search", rename_all = "camelCase")]
    StructuralSearch {
        #[serde(rename = "match")]
        match_clause: String,
        #[serde(rename = "where", default)]
        where_clause: Option<String>,
        #[serde(rename = "return", default)]
        return_clause: Option<String>,
        #[serde(default)]
        params: BTreeMap<String, Value>,
    },
    #[serde(rename = "knowledge_vector_search", rename_all = "camelCase")]
    VectorSearch {
        node_type: NodeKind,
        text: String,
        #[serde(default)]
        k: Option<usize>,
        #[serde(default)]
        min_score: Option<f32>,
    },
    #[serde(rename = "knowledge_hybrid_search", rename_all = "camelCase")]
    HybridSearch {
        node_type: NodeKind,
        text: String,
        relationship_type: String,
        target_type: NodeKind,
        #[serde(default)]
        k: Option<usize>,
        #[serde(default)]
        min_score: Option<f32>,
    },
    #[serde(rename = "knowledge_raw_query", rename_all = "camelCase")]
    RawQuery { query: String },
}

impl ToolCall {
    /// The wire name of this tool
    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::CreateNode { .. } => "knowledge_create_node",
            ToolCall::CreateEdge { .. } => "knowledge_create_edge",
            ToolCall::Alter { .. } => "knowledge_alter",
            ToolCall::StructuralSearch { .. } => "knowledge_search",
            ToolCall::VectorSearch { .. } => "knowledge_vector_search",
            ToolCall::HybridSearch { .. } => "knowledge_hybrid_search",
            ToolCall::RawQuery { .. } => "knowledge_raw_query",
        }
    }

    /// All wire names, used by the debug surface for explicit-mention matching
    pub const NAMES: [&'static str; 7] = [
        "knowledge_create_node",
        "knowledge_create_edge",
        "knowledge_alter",
        "knowledge_search",
        "knowledge_vector_search",
        "knowledge_hybrid_search",
        "knowledge_raw_query",
    ];
}

// ============================================================================
// KNOWLEDGE TOOLS
// ============================================================================

/// The contract layer over the graph store consumed by both workers and the
/// external API.
pub struct KnowledgeTools {
    store: Arc<dyn GraphStore>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl KnowledgeTools {
    pub fn new(store: Arc<dyn GraphStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { store, embedder }
    }

    /// The embedding provider (shared with the gateway's /v1/embeddings)
    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    /// The underlying store
    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    fn embed_name(&self, name: &str) -> Option<Vec<f32>> {
        match self.embedder.embed(name) {
            Ok(embedding) => Some(embedding.vector),
            Err(e) => {
                warn!("embedding generation failed for '{}': {}", name, e);
                None
            }
        }
    }

    /// Create a node, embedding its name and attaching `BELONGS_TO` parents
    pub async fn create_node(
        &self,
        kind: NodeKind,
        name: &str,
        description: &str,
        summary: Option<String>,
        belongs_to: Vec<NodeRef>,
        extra: BTreeMap<String, Value>,
    ) -> Result<NodeCreated> {
        let embedding = self.embed_name(name);
        let embedded = embedding.is_some();
        let spec = CreateNodeSpec {
            kind,
            name: name.to_string(),
            description: description.to_string(),
            summary,
            extra,
            belongs_to,
            embedding,
        };
        let id = self.store.create_node(spec).await?;
        Ok(NodeCreated {
            kind,
            name: name.to_string(),
            id,
            embedded,
        })
    }

    /// Create the cross-product of edges; returns the last created edge id
    pub async fn create_edge(
        &self,
        src_kind: NodeKind,
        src_names: Vec<String>,
        dst_kind: NodeKind,
        dst_names: Vec<String>,
        relationship: &str,
        description: &str,
    ) -> Result<i64> {
        self.store
            .create_edge(EdgeSpec {
                src_kind,
                src_names,
                dst_kind,
                dst_names,
                relationship: relationship.to_string(),
                description: description.to_string(),
            })
            .await
    }

    /// Delete a node, or update its fields. A rename regenerates the
    /// embedding from the new name in the same statement.
    pub async fn alter(
        &self,
        kind: NodeKind,
        id: i64,
        delete: bool,
        fields: BTreeMap<String, Value>,
    ) -> Result<AlterOutcome> {
        if delete && !fields.is_empty() {
            return Err(KnowledgeError::InvalidArguments(
                "delete and field updates are mutually exclusive".to_string(),
            ));
        }
        if delete {
            return self.store.alter(kind, id, NodeChange::Delete).await;
        }

        let embedding = fields
            .get("name")
            .and_then(|v| v.as_str())
            .and_then(|new_name| self.embed_name(new_name));
        self.store
            .alter(kind, id, NodeChange::Update { fields, embedding })
            .await
    }

    /// Run a caller-shaped structural query (capped at 20 rows)
    pub async fn structural_search(
        &self,
        match_clause: String,
        where_clause: Option<String>,
        return_clause: Option<String>,
        params: BTreeMap<String, Value>,
    ) -> Result<Vec<Value>> {
        self.store
            .structural_query(StructuralQuery {
                match_clause,
                where_clause,
                return_clause,
                params,
            })
            .await
    }

    /// Top-k nodes of `kind` semantically similar to `text`
    pub async fn vector_search(
        &self,
        kind: NodeKind,
        text: &str,
        k: Option<usize>,
        min_score: Option<f32>,
    ) -> Result<Vec<ScoredNode>> {
        if text.trim().is_empty() {
            return Err(KnowledgeError::InvalidArguments(
                "search text cannot be empty".to_string(),
            ));
        }
        let embedding = self
            .embedder
            .embed(text)
            .map_err(|e| KnowledgeError::Backend(e.to_string()))?;
        self.store
            .vector_query(
                kind,
                &embedding.vector,
                k.unwrap_or(DEFAULT_SEARCH_K),
                min_score.unwrap_or(DEFAULT_MIN_SCORE),
            )
            .await
    }

    /// Semantically similar `src_kind` nodes joined through `relationship`
    /// to `dst_kind` targets
    pub async fn hybrid_search(
        &self,
        src_kind: NodeKind,
        text: &str,
        relationship: &str,
        dst_kind: NodeKind,
        k: Option<usize>,
        min_score: Option<f32>,
    ) -> Result<Vec<HybridHit>> {
        if text.trim().is_empty() {
            return Err(KnowledgeError::InvalidArguments(
                "search text cannot be empty".to_string(),
            ));
        }
        let embedding = self
            .embedder
            .embed(text)
            .map_err(|e| KnowledgeError::Backend(e.to_string()))?;
        self.store
            .hybrid_query(
                src_kind,
                &embedding.vector,
                relationship,
                dst_kind,
                k.unwrap_or(DEFAULT_SEARCH_K),
                min_score.unwrap_or(DEFAULT_MIN_SCORE),
            )
            .await
    }

    /// Escape hatch: raw Cypher, capped at 20 rows
    pub async fn raw_query(&self, cypher: &str) -> Result<Vec<Value>> {
        self.store.raw_query(cypher).await
    }

    /// Exact-name lookup
    pub async fn find_by_name(&self, kind: NodeKind, name: &str) -> Result<Option<i64>> {
        self.store.find_by_name(kind, name).await
    }

    /// Single entry point for externally-shaped tool calls
    pub async fn dispatch(&self, call: ToolCall) -> Result<Value> {
        match call {
            ToolCall::CreateNode {
                node_type,
                name,
                description,
                summary,
                belongs_to,
                extra,
            } => {
                let parents = resolve_parents(node_type, belongs_to)?;
                let created = self
                    .create_node(node_type, &name, &description, summary, parents, extra)
                    .await?;
                Ok(serde_json::to_value(created).unwrap_or_default())
            }
            ToolCall::CreateEdge {
                source_type,
                source_names,
                target_type,
                target_names,
                relationship_type,
                description,
            } => {
                self.create_edge(
                    source_type,
                    source_names.clone(),
                    target_type,
                    target_names.clone(),
                    &relationship_type,
                    &description,
                )
                .await?;
                Ok(serde_json::json!({
                    "created": source_names.len() * target_names.len(),
                    "relationship": relationship_type,
                }))
            }
            ToolCall::Alter {
                node_type,
                id,
                delete,
                fields,
            } => {
                let outcome = self.alter(node_type, id, delete, fields).await?;
                Ok(serde_json::to_value(outcome).unwrap_or_default())
            }
            ToolCall::StructuralSearch {
                match_clause,
                where_clause,
                return_clause,
                params,
            } => {
                let rows = self
                    .structural_search(match_clause, where_clause, return_clause, params)
                    .await?;
                Ok(Value::Array(rows))
            }
            ToolCall::VectorSearch {
                node_type,
                text,
                k,
                min_score,
            } => {
                let rows = self.vector_search(node_type, &text, k, min_score).await?;
                Ok(serde_json::to_value(rows).unwrap_or_default())
            }
            ToolCall::HybridSearch {
                node_type,
                text,
                relationship_type,
                target_type,
                k,
                min_score,
            } => {
                let rows = self
                    .hybrid_search(node_type, &text, &relationship_type, target_type, k, min_score)
                    .await?;
                Ok(serde_json::to_value(rows).unwrap_or_default())
            }
            ToolCall::RawQuery { query } => {
                let rows = self.raw_query(&query).await?;
                Ok(Value::Array(rows))
            }
        }
    }
}

/// Resolve parent names against the hierarchy parent of `kind`
fn resolve_parents(kind: NodeKind, names: Vec<String>) -> Result<Vec<NodeRef>> {
    if names.is_empty() {
        return Ok(Vec::new());
    }
    let parent_kind = kind.parent().ok_or_else(|| {
        KnowledgeError::InvalidArguments(format!("{kind} nodes cannot have parents"))
    })?;
    Ok(names
        .into_iter()
        .map(|name| NodeRef::new(parent_kind, name))
        .collect())
}

// ============================================================================
// TESTS
// ============================================================================
