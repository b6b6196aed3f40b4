//! In-memory graph store
//!
//! Honors the same contract invariants as the Neo4j store: unique
//! `(kind, name)`, existing edge endpoints, dimension-checked embeddings,
//! mandatory Knowledge summaries, embedding-only vector queries, and
//! detach-delete semantics. Vector queries scan and score with cosine
//! similarity, exactly like the store's first fallback.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use tandem_core::graph::{sort_scored, validate_relationship, StructuralQuery};
use tandem_core::{
    cosine_similarity, AlterOutcome, CreateNodeSpec, EdgeSpec, GraphStore, HybridHit,
    KnowledgeError, NodeChange, NodeKind, Result, ScoredNode,
};

#[derive(Debug, Clone)]
pub struct StoredNode {
    pub id: i64,
    pub kind: NodeKind,
    pub name: String,
    pub description: String,
    pub summary: Option<String>,
    pub extra: BTreeMap<String, Value>,
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone)]
pub struct StoredEdge {
    pub id: i64,
    pub source: i64,
    pub target: i64,
    pub relationship: String,
    pub description: String,
}

#[derive(Default)]
struct Inner {
    nodes: BTreeMap<i64, StoredNode>,
    edges: Vec<StoredEdge>,
    next_node_id: i64,
    next_edge_id: i64,
    schema_inits: usize,
}

/// Shared in-memory store for tests
pub struct MemoryGraph {
    dimensions: usize,
    inner: Mutex<Inner>,
}

impl MemoryGraph {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("memory graph lock poisoned")
    }

    // ------------------------------------------------------------------
    // Test inspection helpers
    // ------------------------------------------------------------------

    pub fn node_by_name(&self, kind: NodeKind, name: &str) -> Option<StoredNode> {
        let inner = self.lock();
        inner
            .nodes
            .values()
            .find(|n| n.kind == kind && n.name == name)
            .cloned()
    }

    pub fn nodes_of_kind(&self, kind: NodeKind) -> Vec<StoredNode> {
        let inner = self.lock();
        inner
            .nodes
            .values()
            .filter(|n| n.kind == kind)
            .cloned()
            .collect()
    }

    pub fn edges_touching(&self, node_id: i64) -> Vec<StoredEdge> {
        let inner = self.lock();
        inner
            .edges
            .iter()
            .filter(|e| e.source == node_id || e.target == node_id)
            .cloned()
            .collect()
    }

    pub fn edge_count(&self) -> usize {
        self.lock().edges.len()
    }

    pub fn schema_init_count(&self) -> usize {
        self.lock().schema_inits
    }
}

impl Inner {
    fn find(&self, kind: NodeKind, name: &str) -> Option<i64> {
        self.nodes
            .values()
            .find(|n| n.kind == kind && n.name == name)
            .map(|n| n.id)
    }
}

#[async_trait]
impl GraphStore for MemoryGraph {
    async fn create_node(&self, spec: CreateNodeSpec) -> Result<i64> {
        if spec.name.trim().is_empty() {
            return Err(KnowledgeError::InvalidArguments(
                "node name cannot be empty".to_string(),
            ));
        }
        if spec.kind == NodeKind::Knowledge
            && spec.summary.as_deref().map(str::trim).unwrap_or("").is_empty()
        {
            return Err(KnowledgeError::InvalidArguments(
                "Knowledge nodes require a summary".to_string(),
            ));
        }
        if let Some(embedding) = &spec.embedding {
            if embedding.len() != self.dimensions {
                return Err(KnowledgeError::DimensionMismatch {
                    expected: self.dimensions,
                    got: embedding.len(),
                });
            }
        }

        let mut inner = self.lock();
        if inner.find(spec.kind, &spec.name).is_some() {
            return Err(KnowledgeError::DuplicateName {
                kind: spec.kind,
                name: spec.name,
            });
        }

        // Resolve parents before creating anything, so a missing parent
        // leaves the store untouched (the statement-level atomicity of the
        // production store)
        let mut parent_ids = Vec::with_capacity(spec.belongs_to.len());
        for parent in &spec.belongs_to {
            match inner.find(parent.kind, &parent.name) {
                Some(id) => parent_ids.push(id),
                None => {
                    return Err(KnowledgeError::NotFound(format!(
                        "parent {}:{}",
                        parent.kind, parent.name
                    )));
                }
            }
        }

        inner.next_node_id += 1;
        let id = inner.next_node_id;
        inner.nodes.insert(
            id,
            StoredNode {
                id,
                kind: spec.kind,
                name: spec.name,
                description: spec.description,
                summary: spec.summary,
                extra: spec.extra,
                embedding: spec.embedding,
            },
        );
        for parent_id in parent_ids {
            inner.next_edge_id += 1;
            let edge_id = inner.next_edge_id;
            inner.edges.push(StoredEdge {
                id: edge_id,
                source: id,
                target: parent_id,
                relationship: "BELONGS_TO".to_string(),
                description: "belongs to".to_string(),
            });
        }
        Ok(id)
    }

    async fn set_embedding(&self, kind: NodeKind, id: i64, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimensions {
            return Err(KnowledgeError::DimensionMismatch {
                expected: self.dimensions,
                got: vector.len(),
            });
        }
        let mut inner = self.lock();
        match inner.nodes.get_mut(&id) {
            Some(node) if node.kind == kind => {
                node.embedding = Some(vector.to_vec());
                Ok(())
            }
            _ => Err(KnowledgeError::NotFound(format!("{kind} #{id}"))),
        }
    }

    async fn create_edge(&self, spec: EdgeSpec) -> Result<i64> {
        validate_relationship(&spec.relationship)?;
        let mut inner = self.lock();

        let mut src_ids = Vec::new();
        for name in &spec.src_names {
            src_ids.push(inner.find(spec.src_kind, name).ok_or_else(|| {
                KnowledgeError::NotFound(format!("{}:{}", spec.src_kind, name))
            })?);
        }
        let mut dst_ids = Vec::new();
        for name in &spec.dst_names {
            dst_ids.push(inner.find(spec.dst_kind, name).ok_or_else(|| {
                KnowledgeError::NotFound(format!("{}:{}", spec.dst_kind, name))
            })?);
        }

        let mut last_id = None;
        for &source in &src_ids {
            for &target in &dst_ids {
                inner.next_edge_id += 1;
                let id = inner.next_edge_id;
                inner.edges.push(StoredEdge {
                    id,
                    source,
                    target,
                    relationship: spec.relationship.clone(),
                    description: spec.description.clone(),
                });
                last_id = Some(id);
            }
        }
        last_id.ok_or_else(|| {
            KnowledgeError::InvalidArguments("edge endpoints cannot be empty".to_string())
        })
    }

    async fn alter(&self, kind: NodeKind, id: i64, change: NodeChange) -> Result<AlterOutcome> {
        let mut inner = self.lock();
        let exists = inner.nodes.get(&id).map(|n| n.kind == kind).unwrap_or(false);
        if !exists {
            return Err(KnowledgeError::NotFound(format!("{kind} #{id}")));
        }

        match change {
            NodeChange::Delete => {
                inner.nodes.remove(&id);
                // Detach-delete semantics
                inner.edges.retain(|e| e.source != id && e.target != id);
                Ok(AlterOutcome::Deleted)
            }
            NodeChange::Update { fields, embedding } => {
                if let Some(vector) = &embedding {
                    if vector.len() != self.dimensions {
                        return Err(KnowledgeError::DimensionMismatch {
                            expected: self.dimensions,
                            got: vector.len(),
                        });
                    }
                }
                if let Some(new_name) = fields.get("name").and_then(|v| v.as_str()) {
                    if let Some(other) = inner.find(kind, new_name) {
                        if other != id {
                            return Err(KnowledgeError::DuplicateName {
                                kind,
                                name: new_name.to_string(),
                            });
                        }
                    }
                }

                let node = inner.nodes.get_mut(&id).expect("checked above");
                for (key, value) in fields {
                    match (key.as_str(), &value) {
                        ("name", Value::String(s)) => node.name = s.clone(),
                        ("description", Value::String(s)) => node.description = s.clone(),
                        ("summary", Value::String(s)) => node.summary = Some(s.clone()),
                        _ => {
                            node.extra.insert(key, value);
                        }
                    }
                }
                if let Some(vector) = embedding {
                    node.embedding = Some(vector);
                }
                Ok(AlterOutcome::Updated)
            }
        }
    }

    async fn structural_query(&self, _query: StructuralQuery) -> Result<Vec<Value>> {
        Err(KnowledgeError::Backend(
            "structural queries are not supported by the in-memory store".to_string(),
        ))
    }

    async fn vector_query(
        &self,
        kind: NodeKind,
        vector: &[f32],
        k: usize,
        min_score: f32,
    ) -> Result<Vec<ScoredNode>> {
        if vector.len() != self.dimensions {
            return Err(KnowledgeError::DimensionMismatch {
                expected: self.dimensions,
                got: vector.len(),
            });
        }
        let inner = self.lock();
        let mut rows: Vec<ScoredNode> = inner
            .nodes
            .values()
            .filter(|n| n.kind == kind)
            .filter_map(|n| {
                // Nodes without an embedding never appear in vector results
                let embedding = n.embedding.as_ref()?;
                let score = cosine_similarity(vector, embedding);
                (score >= min_score).then(|| ScoredNode {
                    id: n.id,
                    name: n.name.clone(),
                    description: n.description.clone(),
                    score,
                })
            })
            .collect();
        sort_scored(&mut rows);
        rows.truncate(k);
        Ok(rows)
    }

    async fn hybrid_query(
        &self,
        src_kind: NodeKind,
        vector: &[f32],
        relationship: &str,
        dst_kind: NodeKind,
        k: usize,
        min_score: f32,
    ) -> Result<Vec<HybridHit>> {
        validate_relationship(relationship)?;
        let sources = self
            .vector_query(src_kind, vector, k, min_score)
            .await?;

        let inner = self.lock();
        let mut hits = Vec::new();
        for source in &sources {
            for edge in inner
                .edges
                .iter()
                .filter(|e| e.relationship == relationship)
            {
                // BELONGS_TO edges point child -> parent; hybrid joins follow
                // the relationship in either direction from the ranked source
                let other = if edge.source == source.id {
                    edge.target
                } else if edge.target == source.id {
                    edge.source
                } else {
                    continue;
                };
                let Some(node) = inner.nodes.get(&other) else {
                    continue;
                };
                if node.kind != dst_kind {
                    continue;
                }
                hits.push(HybridHit {
                    source: source.clone(),
                    relationship: relationship.to_string(),
                    target: ScoredNode {
                        id: node.id,
                        name: node.name.clone(),
                        description: node.description.clone(),
                        score: source.score,
                    },
                    score: source.score,
                });
            }
        }
        Ok(hits)
    }

    async fn raw_query(&self, _cypher: &str) -> Result<Vec<Value>> {
        Err(KnowledgeError::Backend(
            "raw queries are not supported by the in-memory store".to_string(),
        ))
    }

    async fn find_by_name(&self, kind: NodeKind, name: &str) -> Result<Option<i64>> {
        Ok(self.lock().find(kind, name))
    }

    async fn schema_init(&self) -> Result<()> {
        self.lock().schema_inits += 1;
        Ok(())
    }
}
