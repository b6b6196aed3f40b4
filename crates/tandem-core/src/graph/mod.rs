//! Graph Store Contract
//!
//! Typed nodes and relationships over a transactional Cypher-style backend
//! with per-label cosine vector indexes. The production backend is Neo4j
//! ([`Neo4jStore`]); tests substitute an in-memory implementation behind the
//! same [`GraphStore`] trait.
//!
//! Invariants the contract upholds:
//! - `(kind, name)` is unique; collisions fail with `DuplicateName`
//! - edge endpoints must exist at commit time
//! - a stored embedding always has the configured dimension `D`
//! - `Knowledge` nodes carry a non-empty `summary`
//! - vector queries only return nodes that have an embedding
//! - node deletion detaches incident edges

mod neo4j;

pub use neo4j::Neo4jStore;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// NODE KINDS
// ============================================================================

/// The closed set of node labels in the knowledge graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// Grouping of tags
    TagCategory,
    /// A tag attached to topics
    Tag,
    /// A subject the graph holds knowledge about
    Topic,
    /// A discrete piece of stored knowledge
    Knowledge,
}

impl NodeKind {
    /// All kinds, in schema-initialization order
    pub const ALL: [NodeKind; 4] = [
        NodeKind::TagCategory,
        NodeKind::Tag,
        NodeKind::Topic,
        NodeKind::Knowledge,
    ];

    /// The graph label for this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::TagCategory => "TagCategory",
            NodeKind::Tag => "Tag",
            NodeKind::Topic => "Topic",
            NodeKind::Knowledge => "Knowledge",
        }
    }

    /// Parse from a label string
    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "TagCategory" | "tagcategory" | "tag_category" => Some(NodeKind::TagCategory),
            "Tag" | "tag" => Some(NodeKind::Tag),
            "Topic" | "topic" => Some(NodeKind::Topic),
            "Knowledge" | "knowledge" => Some(NodeKind::Knowledge),
            _ => None,
        }
    }

    /// The natural hierarchy parent of this kind, when one exists
    pub fn parent(&self) -> Option<NodeKind> {
        match self {
            NodeKind::TagCategory => None,
            NodeKind::Tag => Some(NodeKind::TagCategory),
            NodeKind::Topic => Some(NodeKind::Tag),
            NodeKind::Knowledge => Some(NodeKind::Topic),
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The reserved relationship attaching a node to its parents
pub const BELONGS_TO: &str = "BELONGS_TO";

/// Maximum rows any structural or raw query returns
pub const QUERY_ROW_CAP: usize = 20;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Typed failures surfaced by the graph store and the knowledge tools
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KnowledgeError {
    /// `(kind, name)` uniqueness violation
    #[error("duplicate name '{name}' for kind {kind}")]
    DuplicateName { kind: NodeKind, name: String },
    /// A referenced node does not exist
    #[error("not found: {0}")]
    NotFound(String),
    /// Embedding length differs from the configured dimension
    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    /// Malformed tool or query arguments
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    /// Underlying driver failure
    #[error("graph backend error: {0}")]
    Backend(String),
}

/// Graph result type
pub type Result<T> = std::result::Result<T, KnowledgeError>;

// ============================================================================
// ROW & SPEC TYPES
// ============================================================================

/// External node identity: `(kind, name)`. Internal integer ids never leave
/// the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRef {
    pub kind: NodeKind,
    pub name: String,
}

impl NodeRef {
    pub fn new(kind: NodeKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

/// Everything needed to create a node in one atomic statement
#[derive(Debug, Clone)]
pub struct CreateNodeSpec {
    pub kind: NodeKind,
    pub name: String,
    pub description: String,
    /// Mandatory when `kind == Knowledge`
    pub summary: Option<String>,
    /// Free-form scalar properties
    pub extra: BTreeMap<String, serde_json::Value>,
    /// Parents to attach via `BELONGS_TO`; all must exist
    pub belongs_to: Vec<NodeRef>,
    /// Pre-computed embedding, already shaped to `D`
    pub embedding: Option<Vec<f32>>,
}

impl CreateNodeSpec {
    pub fn new(kind: NodeKind, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            description: description.into(),
            summary: None,
            extra: BTreeMap::new(),
            belongs_to: Vec::new(),
            embedding: None,
        }
    }
}

/// Cross-product edge creation between named nodes
#[derive(Debug, Clone)]
pub struct EdgeSpec {
    pub src_kind: NodeKind,
    pub src_names: Vec<String>,
    pub dst_kind: NodeKind,
    pub dst_names: Vec<String>,
    pub relationship: String,
    pub description: String,
}

/// Mutation applied by `alter`: deletion and update are mutually exclusive
#[derive(Debug, Clone)]
pub enum NodeChange {
    /// Remove the node and detach its incident edges
    Delete,
    /// Update scalar fields; a rename carries the regenerated embedding so
    /// both apply in a single statement
    Update {
        fields: BTreeMap<String, serde_json::Value>,
        embedding: Option<Vec<f32>>,
    },
}

/// Result of an `alter` call
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AlterOutcome {
    Deleted,
    Updated,
}

/// One vector-query hit
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredNode {
    #[serde(skip)]
    pub id: i64,
    pub name: String,
    pub description: String,
    pub score: f32,
}

/// One hybrid-query row: a vector-ranked source joined to a structural target
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HybridHit {
    pub source: ScoredNode,
    pub relationship: String,
    pub target: ScoredNode,
    pub score: f32,
}

/// A structural query: MATCH / WHERE / RETURN fragments plus parameters
#[derive(Debug, Clone, Default)]
pub struct StructuralQuery {
    pub match_clause: String,
    pub where_clause: Option<String>,
    pub return_clause: Option<String>,
    pub params: BTreeMap<String, serde_json::Value>,
}

// ============================================================================
// STORE CONTRACT
// ============================================================================

/// The transactional graph backend the knowledge tools are written against.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Create a node, its optional embedding, and its `BELONGS_TO` edges in
    /// one atomic commit. Returns the driver-assigned id.
    async fn create_node(&self, spec: CreateNodeSpec) -> Result<i64>;

    /// Write the `embedding` property of an existing node
    async fn set_embedding(&self, kind: NodeKind, id: i64, vector: &[f32]) -> Result<()>;

    /// Create the cross-product of edges; returns the id of the last one
    async fn create_edge(&self, spec: EdgeSpec) -> Result<i64>;

    /// Delete or update a node
    async fn alter(&self, kind: NodeKind, id: i64, change: NodeChange) -> Result<AlterOutcome>;

    /// Run a caller-shaped MATCH query, capped at [`QUERY_ROW_CAP`] rows
    async fn structural_query(&self, query: StructuralQuery) -> Result<Vec<serde_json::Value>>;

    /// k-NN over the label's embeddings, descending score, ties to lower id
    async fn vector_query(
        &self,
        kind: NodeKind,
        vector: &[f32],
        k: usize,
        min_score: f32,
    ) -> Result<Vec<ScoredNode>>;

    /// Vector-rank `src_kind` nodes, join each through `relationship` to
    /// `dst_kind` targets
    async fn hybrid_query(
        &self,
        src_kind: NodeKind,
        vector: &[f32],
        relationship: &str,
        dst_kind: NodeKind,
        k: usize,
        min_score: f32,
    ) -> Result<Vec<HybridHit>>;

    /// Escape hatch: run a raw Cypher string, capped at [`QUERY_ROW_CAP`] rows
    async fn raw_query(&self, cypher: &str) -> Result<Vec<serde_json::Value>>;

    /// Exact-name lookup, returning the node id when present
    async fn find_by_name(&self, kind: NodeKind, name: &str) -> Result<Option<i64>>;

    /// Create uniqueness constraints, name indexes, and vector indexes for
    /// every kind. Idempotent.
    async fn schema_init(&self) -> Result<()>;
}

/// Validate a relationship type before it is interpolated into Cypher.
/// Relationship types cannot be passed as parameters.
pub fn validate_relationship(rel: &str) -> Result<()> {
    let mut chars = rel.chars();
    let head_ok = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if head_ok && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(KnowledgeError::InvalidArguments(format!(
            "invalid relationship type '{rel}'"
        )))
    }
}

/// Order scored rows: score descending, ties broken by lower id.
pub fn sort_scored(rows: &mut [ScoredNode]) {
    rows.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}

// ============================================================================
// TESTS
// ============================================================================
