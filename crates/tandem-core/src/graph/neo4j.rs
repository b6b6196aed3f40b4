//! Neo4j Graph Store
//!
//! Bolt-backed implementation of the [`GraphStore`] contract. Writes that
//! span a node and its edges are issued as single Cypher statements so they
//! commit atomically; existence guards (`WITH ... WHERE size(...) = $n`) make a
//! missing endpoint fail the whole statement instead of silently dropping
//! edges.
//!
//! Vector queries degrade in a fixed chain:
//! 1. native `db.index.vector.queryNodes` over the label's cosine index
//! 2. scan of embedded nodes plus in-process cosine scoring
//! 3. unscored scan with placeholder score 1.0
//!
//! Every degradation is logged.

use async_trait::async_trait;
use neo4rs::{query, BoltType, Graph, Query};
use tracing::{debug, warn};

use crate::embeddings::cosine_similarity;

use super::{
    sort_scored, validate_relationship, AlterOutcome, CreateNodeSpec, EdgeSpec, GraphStore,
    HybridHit, KnowledgeError, NodeChange, NodeKind, Result, ScoredNode, StructuralQuery,
    QUERY_ROW_CAP,
};

/// Neo4j-backed graph store
pub struct Neo4jStore {
    graph: Graph,
    dimensions: usize,
}

impl Neo4jStore {
    /// Connect to a Neo4j instance. `dimensions` is the vector-index width `D`.
    pub async fn connect(
        uri: &str,
        user: &str,
        password: &str,
        dimensions: usize,
    ) -> Result<Self> {
        let graph = Graph::new(uri, user, password)
            .await
            .map_err(|e| KnowledgeError::Backend(format!("connect {uri}: {e}")))?;
        Ok(Self { graph, dimensions })
    }

    /// The configured embedding dimension
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimensions {
            return Err(KnowledgeError::DimensionMismatch {
                expected: self.dimensions,
                got: vector.len(),
            });
        }
        Ok(())
    }

    /// Collect up to `cap` rows of a query as JSON objects
    async fn fetch_rows(&self, q: Query, cap: usize) -> Result<Vec<serde_json::Value>> {
        let mut stream = self.graph.execute(q).await.map_err(map_backend)?;
        let mut rows = Vec::new();
        while rows.len() < cap {
            match stream.next().await.map_err(map_backend)? {
                Some(row) => {
                    let value = row
                        .to::<serde_json::Value>()
                        .map_err(|e| KnowledgeError::Backend(e.to_string()))?;
                    rows.push(value);
                }
                None => break,
            }
        }
        Ok(rows)
    }

    async fn vector_query_native(
        &self,
        kind: NodeKind,
        vector: &[f32],
        k: usize,
        min_score: f32,
    ) -> Result<Vec<ScoredNode>> {
        let q = query(
            "CALL db.index.vector.queryNodes($index, $k, $vec) \
             YIELD node, score \
             WHERE score >= $min AND $label IN labels(node) \
             RETURN id(node) AS id, node.name AS name, \
                    coalesce(node.description, '') AS description, score \
             ORDER BY score DESC, id ASC",
        )
        .param("index", vector_index_name(kind))
        .param("k", k as i64)
        .param("vec", to_f64(vector))
        .param("min", min_score as f64)
        .param("label", kind.as_str());

        let mut stream = self.graph.execute(q).await.map_err(map_backend)?;
        let mut out = Vec::new();
        while let Some(row) = stream.next().await.map_err(map_backend)? {
            out.push(ScoredNode {
                id: row.get("id").map_err(map_row)?,
                name: row.get("name").map_err(map_row)?,
                description: row.get("description").map_err(map_row)?,
                score: row.get::<f64>("score").map_err(map_row)? as f32,
            });
        }
        Ok(out)
    }

    /// First fallback: scan embedded nodes and score in-process
    async fn vector_query_scan(
        &self,
        kind: NodeKind,
        vector: &[f32],
        k: usize,
        min_score: f32,
    ) -> Result<Vec<ScoredNode>> {
        let q = query(&format!(
            "MATCH (n:{label}) WHERE n.embedding IS NOT NULL \
             RETURN id(n) AS id, n.name AS name, \
                    coalesce(n.description, '') AS description, n.embedding AS embedding",
            label = kind.as_str()
        ));

        let mut stream = self.graph.execute(q).await.map_err(map_backend)?;
        let mut out = Vec::new();
        while let Some(row) = stream.next().await.map_err(map_backend)? {
            let embedding: Vec<f64> = row.get("embedding").map_err(map_row)?;
            let embedding: Vec<f32> = embedding.into_iter().map(|v| v as f32).collect();
            let score = cosine_similarity(vector, &embedding);
            if score >= min_score {
                out.push(ScoredNode {
                    id: row.get("id").map_err(map_row)?,
                    name: row.get("name").map_err(map_row)?,
                    description: row.get("description").map_err(map_row)?,
                    score,
                });
            }
        }
        sort_scored(&mut out);
        out.truncate(k);
        Ok(out)
    }

    /// Last resort: unscored scan with placeholder score 1.0
    async fn vector_query_unscored(&self, kind: NodeKind, k: usize) -> Result<Vec<ScoredNode>> {
        let q = query(&format!(
            "MATCH (n:{label}) \
             RETURN id(n) AS id, n.name AS name, \
                    coalesce(n.description, '') AS description \
             ORDER BY id ASC LIMIT $k",
            label = kind.as_str()
        ))
        .param("k", k as i64);

        let mut stream = self.graph.execute(q).await.map_err(map_backend)?;
        let mut out = Vec::new();
        while let Some(row) = stream.next().await.map_err(map_backend)? {
            out.push(ScoredNode {
                id: row.get("id").map_err(map_row)?,
                name: row.get("name").map_err(map_row)?,
                description: row.get("description").map_err(map_row)?,
                score: 1.0,
            });
        }
        Ok(out)
    }
}

// ============================================================================
// CYPHER BUILDERS
// ============================================================================

/// Name of the per-label vector index
fn vector_index_name(kind: NodeKind) -> String {
    format!("tandem_{}_embedding", kind.as_str().to_lowercase())
}

/// Property names are interpolated into Cypher, so they get the same
/// identifier discipline as relationship types.
fn validate_property(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let head_ok = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if head_ok && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(KnowledgeError::InvalidArguments(format!(
            "invalid property name '{name}'"
        )))
    }
}

/// Build the single-statement node creation Cypher. With parents present the
/// statement matches and counts them first, so a missing parent yields zero
/// rows and nothing is created.
fn create_node_cypher(
    label: &str,
    has_summary: bool,
    has_embedding: bool,
    has_parents: bool,
    extra_keys: &[String],
) -> String {
    let mut sets = vec![];
    if has_summary {
        sets.push("n.summary = $summary".to_string());
    }
    if has_embedding {
        sets.push("n.embedding = $embedding".to_string());
    }
    for key in extra_keys {
        sets.push(format!("n.{key} = $extra_{key}"));
    }
    let set_clause = if sets.is_empty() {
        String::new()
    } else {
        format!("SET {} ", sets.join(", "))
    };

    if has_parents {
        format!(
            "UNWIND range(0, size($parent_names) - 1) AS i \
             MATCH (p {{name: $parent_names[i]}}) \
             WHERE $parent_labels[i] IN labels(p) \
             WITH collect(p) AS parents \
             WHERE size(parents) = $parent_count \
             CREATE (n:{label} {{name: $name, description: $description}}) \
             {set_clause}\
             FOREACH (p IN parents | CREATE (n)-[:BELONGS_TO {{description: $belongs_description}}]->(p)) \
             RETURN id(n) AS id"
        )
    } else {
        format!(
            "CREATE (n:{label} {{name: $name, description: $description}}) \
             {set_clause}\
             RETURN id(n) AS id"
        )
    }
}

/// Build the guarded cross-product edge creation Cypher
fn create_edge_cypher(src_label: &str, dst_label: &str, relationship: &str) -> String {
    format!(
        "MATCH (s:{src_label}) WHERE s.name IN $src_names \
         WITH collect(s) AS ss \
         WHERE size(ss) = $src_count \
         MATCH (t:{dst_label}) WHERE t.name IN $dst_names \
         WITH ss, collect(t) AS ts \
         WHERE size(ts) = $dst_count \
         UNWIND ss AS s UNWIND ts AS t \
         CREATE (s)-[r:{relationship} {{description: $description}}]->(t) \
         RETURN id(r) AS id"
    )
}

fn update_cypher(label: &str, field_keys: &[String], has_embedding: bool) -> String {
    let mut sets: Vec<String> = field_keys
        .iter()
        .map(|key| format!("n.{key} = $field_{key}"))
        .collect();
    if has_embedding {
        sets.push("n.embedding = $embedding".to_string());
    }
    format!(
        "MATCH (n:{label}) WHERE id(n) = $id \
         SET {} \
         RETURN count(n) AS touched",
        sets.join(", ")
    )
}

/// Convert a JSON scalar (or list of scalars) into a Bolt parameter
fn to_bolt(value: &serde_json::Value) -> Result<BoltType> {
    match value {
        serde_json::Value::String(s) => Ok(BoltType::from(s.clone())),
        serde_json::Value::Bool(b) => Ok(BoltType::from(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(BoltType::from(i))
            } else if let Some(f) = n.as_f64() {
                Ok(BoltType::from(f))
            } else {
                Err(KnowledgeError::InvalidArguments(format!(
                    "unsupported numeric parameter {n}"
                )))
            }
        }
        serde_json::Value::Array(items) => {
            let converted: Result<Vec<BoltType>> = items.iter().map(to_bolt).collect();
            Ok(BoltType::from(converted?))
        }
        other => Err(KnowledgeError::InvalidArguments(format!(
            "unsupported parameter value {other}"
        ))),
    }
}

fn to_f64(vector: &[f32]) -> Vec<f64> {
    vector.iter().map(|v| *v as f64).collect()
}

/// Map a driver error, recognizing uniqueness-constraint violations
fn map_backend(e: neo4rs::Error) -> KnowledgeError {
    let text = e.to_string();
    if text.contains("ConstraintValidationFailed") || text.contains("already exists") {
        // kind/name filled in by the caller when it has them
        KnowledgeError::Backend(format!("constraint violation: {text}"))
    } else {
        KnowledgeError::Backend(text)
    }
}

fn is_duplicate(e: &KnowledgeError) -> bool {
    matches!(e, KnowledgeError::Backend(text) if text.contains("constraint violation"))
}

fn map_row(e: neo4rs::DeError) -> KnowledgeError {
    KnowledgeError::Backend(format!("row decode: {e}"))
}

// ============================================================================
// STORE IMPLEMENTATION
// ============================================================================

#[async_trait]
impl GraphStore for Neo4jStore {
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
            self.check_dimension(embedding)?;
        }
        let extra_keys: Vec<String> = spec.extra.keys().cloned().collect();
        for key in &extra_keys {
            validate_property(key)?;
        }

        let has_parents = !spec.belongs_to.is_empty();
        let cypher = create_node_cypher(
            spec.kind.as_str(),
            spec.summary.is_some(),
            spec.embedding.is_some(),
            has_parents,
            &extra_keys,
        );

        let mut q = query(&cypher)
            .param("name", spec.name.clone())
            .param("description", spec.description.clone());
        if let Some(summary) = &spec.summary {
            q = q.param("summary", summary.clone());
        }
        if let Some(embedding) = &spec.embedding {
            q = q.param("embedding", to_f64(embedding));
        }
        for (key, value) in &spec.extra {
            q = q.param(&format!("extra_{key}"), to_bolt(value)?);
        }
        if has_parents {
            let names: Vec<String> = spec.belongs_to.iter().map(|p| p.name.clone()).collect();
            let labels: Vec<String> = spec
                .belongs_to
                .iter()
                .map(|p| p.kind.as_str().to_string())
                .collect();
            q = q
                .param("parent_names", names)
                .param("parent_labels", labels)
                .param("parent_count", spec.belongs_to.len() as i64)
                .param("belongs_description", "belongs to");
        }

        let mut stream = self.graph.execute(q).await.map_err(|e| {
            let mapped = map_backend(e);
            if is_duplicate(&mapped) {
                KnowledgeError::DuplicateName {
                    kind: spec.kind,
                    name: spec.name.clone(),
                }
            } else {
                mapped
            }
        })?;

        match stream.next().await.map_err(map_backend)? {
            Some(row) => {
                let id: i64 = row.get("id").map_err(map_row)?;
                debug!("created node {}:{} (#{})", spec.kind, spec.name, id);
                Ok(id)
            }
            None => Err(KnowledgeError::NotFound(format!(
                "parent node missing for {}:{}",
                spec.kind, spec.name
            ))),
        }
    }

    async fn set_embedding(&self, kind: NodeKind, id: i64, vector: &[f32]) -> Result<()> {
        self.check_dimension(vector)?;
        let q = query(&format!(
            "MATCH (n:{label}) WHERE id(n) = $id \
             SET n.embedding = $embedding \
             RETURN count(n) AS touched",
            label = kind.as_str()
        ))
        .param("id", id)
        .param("embedding", to_f64(vector));

        let mut stream = self.graph.execute(q).await.map_err(map_backend)?;
        let touched: i64 = match stream.next().await.map_err(map_backend)? {
            Some(row) => row.get("touched").map_err(map_row)?,
            None => 0,
        };
        if touched == 0 {
            return Err(KnowledgeError::NotFound(format!("{kind} #{id}")));
        }
        Ok(())
    }

    async fn create_edge(&self, spec: EdgeSpec) -> Result<i64> {
        validate_relationship(&spec.relationship)?;
        let mut src_names = spec.src_names.clone();
        let mut dst_names = spec.dst_names.clone();
        src_names.dedup();
        dst_names.dedup();
        if src_names.is_empty() || dst_names.is_empty() {
            return Err(KnowledgeError::InvalidArguments(
                "edge endpoints cannot be empty".to_string(),
            ));
        }

        let cypher = create_edge_cypher(
            spec.src_kind.as_str(),
            spec.dst_kind.as_str(),
            &spec.relationship,
        );
        let q = query(&cypher)
            .param("src_names", src_names.clone())
            .param("src_count", src_names.len() as i64)
            .param("dst_names", dst_names.clone())
            .param("dst_count", dst_names.len() as i64)
            .param("description", spec.description.clone());

        let mut stream = self.graph.execute(q).await.map_err(map_backend)?;
        let mut last_id = None;
        while let Some(row) = stream.next().await.map_err(map_backend)? {
            last_id = Some(row.get::<i64>("id").map_err(map_row)?);
        }
        last_id.ok_or_else(|| {
            KnowledgeError::NotFound(format!(
                "edge endpoint missing ({}:{:?} -[{}]-> {}:{:?})",
                spec.src_kind, src_names, spec.relationship, spec.dst_kind, dst_names
            ))
        })
    }

    async fn alter(&self, kind: NodeKind, id: i64, change: NodeChange) -> Result<AlterOutcome> {
        match change {
            NodeChange::Delete => {
                let q = query(&format!(
                    "MATCH (n:{label}) WHERE id(n) = $id \
                     DETACH DELETE n \
                     RETURN count(n) AS touched",
                    label = kind.as_str()
                ))
                .param("id", id);

                let mut stream = self.graph.execute(q).await.map_err(map_backend)?;
                let touched: i64 = match stream.next().await.map_err(map_backend)? {
                    Some(row) => row.get("touched").map_err(map_row)?,
                    None => 0,
                };
                if touched == 0 {
                    return Err(KnowledgeError::NotFound(format!("{kind} #{id}")));
                }
                Ok(AlterOutcome::Deleted)
            }
            NodeChange::Update { fields, embedding } => {
                if fields.is_empty() && embedding.is_none() {
                    return Err(KnowledgeError::InvalidArguments(
                        "update with no fields".to_string(),
                    ));
                }
                if let Some(vector) = &embedding {
                    self.check_dimension(vector)?;
                }
                let keys: Vec<String> = fields.keys().cloned().collect();
                for key in &keys {
                    validate_property(key)?;
                }

                let cypher = update_cypher(kind.as_str(), &keys, embedding.is_some());
                let mut q = query(&cypher).param("id", id);
                for (key, value) in &fields {
                    q = q.param(&format!("field_{key}"), to_bolt(value)?);
                }
                if let Some(vector) = &embedding {
                    q = q.param("embedding", to_f64(vector));
                }

                let mut stream = self.graph.execute(q).await.map_err(|e| {
                    let mapped = map_backend(e);
                    if is_duplicate(&mapped) {
                        KnowledgeError::DuplicateName {
                            kind,
                            name: fields
                                .get("name")
                                .and_then(|v| v.as_str())
                                .unwrap_or_default()
                                .to_string(),
                        }
                    } else {
                        mapped
                    }
                })?;
                let touched: i64 = match stream.next().await.map_err(map_backend)? {
                    Some(row) => row.get("touched").map_err(map_row)?,
                    None => 0,
                };
                if touched == 0 {
                    return Err(KnowledgeError::NotFound(format!("{kind} #{id}")));
                }
                Ok(AlterOutcome::Updated)
            }
        }
    }

    async fn structural_query(&self, sq: StructuralQuery) -> Result<Vec<serde_json::Value>> {
        if sq.match_clause.trim().is_empty() {
            return Err(KnowledgeError::InvalidArguments(
                "match clause cannot be empty".to_string(),
            ));
        }
        let mut cypher = format!("MATCH {}", sq.match_clause);
        if let Some(where_clause) = &sq.where_clause {
            cypher.push_str(&format!(" WHERE {where_clause}"));
        }
        let return_clause = sq.return_clause.as_deref().unwrap_or("*");
        cypher.push_str(&format!(" RETURN {return_clause} LIMIT {QUERY_ROW_CAP}"));

        let mut q = query(&cypher);
        for (key, value) in &sq.params {
            validate_property(key)?;
            q = q.param(key.as_str(), to_bolt(value)?);
        }
        self.fetch_rows(q, QUERY_ROW_CAP).await
    }

    async fn vector_query(
        &self,
        kind: NodeKind,
        vector: &[f32],
        k: usize,
        min_score: f32,
    ) -> Result<Vec<ScoredNode>> {
        self.check_dimension(vector)?;

        match self.vector_query_native(kind, vector, k, min_score).await {
            Ok(rows) => return Ok(rows),
            Err(e) => {
                warn!("native vector query failed for {kind}, falling back to scan: {e}");
            }
        }
        match self.vector_query_scan(kind, vector, k, min_score).await {
            Ok(rows) => return Ok(rows),
            Err(e) => {
                warn!("embedding scan failed for {kind}, falling back to unscored scan: {e}");
            }
        }
        self.vector_query_unscored(kind, k).await
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
        let sources = self.vector_query(src_kind, vector, k, min_score).await?;
        if sources.is_empty() {
            return Ok(Vec::new());
        }

        // Undirected: BELONGS_TO runs child -> parent, hybrid joins follow
        // the relationship from the ranked source either way
        let ids: Vec<i64> = sources.iter().map(|s| s.id).collect();
        let q = query(&format!(
            "MATCH (s:{src})-[r:{rel}]-(t:{dst}) \
             WHERE id(s) IN $ids \
             RETURN id(s) AS sid, type(r) AS rel, id(t) AS tid, \
                    t.name AS tname, coalesce(t.description, '') AS tdescription",
            src = src_kind.as_str(),
            rel = relationship,
            dst = dst_kind.as_str()
        ))
        .param("ids", ids);

        let mut stream = self.graph.execute(q).await.map_err(map_backend)?;
        let mut joined: Vec<(i64, String, ScoredNode)> = Vec::new();
        while let Some(row) = stream.next().await.map_err(map_backend)? {
            let sid: i64 = row.get("sid").map_err(map_row)?;
            let rel: String = row.get("rel").map_err(map_row)?;
            let target = ScoredNode {
                id: row.get("tid").map_err(map_row)?,
                name: row.get("tname").map_err(map_row)?,
                description: row.get("tdescription").map_err(map_row)?,
                score: 0.0,
            };
            joined.push((sid, rel, target));
        }

        // Preserve source ranking: iterate sources in score order
        let mut hits = Vec::new();
        for source in &sources {
            for (sid, rel, target) in &joined {
                if *sid == source.id {
                    let mut target = target.clone();
                    target.score = source.score;
                    hits.push(HybridHit {
                        source: source.clone(),
                        relationship: rel.clone(),
                        target,
                        score: source.score,
                    });
                }
            }
        }
        Ok(hits)
    }

    async fn raw_query(&self, cypher: &str) -> Result<Vec<serde_json::Value>> {
        if cypher.trim().is_empty() {
            return Err(KnowledgeError::InvalidArguments(
                "query cannot be empty".to_string(),
            ));
        }
        self.fetch_rows(query(cypher), QUERY_ROW_CAP).await
    }

    async fn find_by_name(&self, kind: NodeKind, name: &str) -> Result<Option<i64>> {
        let q = query(&format!(
            "MATCH (n:{label} {{name: $name}}) RETURN id(n) AS id LIMIT 1",
            label = kind.as_str()
        ))
        .param("name", name);

        let mut stream = self.graph.execute(q).await.map_err(map_backend)?;
        match stream.next().await.map_err(map_backend)? {
            Some(row) => Ok(Some(row.get("id").map_err(map_row)?)),
            None => Ok(None),
        }
    }

    async fn schema_init(&self) -> Result<()> {
        for kind in NodeKind::ALL {
            let label = kind.as_str();
            let lower = label.to_lowercase();

            self.graph
                .run(query(&format!(
                    "CREATE CONSTRAINT tandem_{lower}_name_unique IF NOT EXISTS \
                     FOR (n:{label}) REQUIRE n.name IS UNIQUE"
                )))
                .await
                .map_err(map_backend)?;

            self.graph
                .run(query(&format!(
                    "CREATE INDEX tandem_{lower}_name IF NOT EXISTS \
                     FOR (n:{label}) ON (n.name)"
                )))
                .await
                .map_err(map_backend)?;

            let index = vector_index_name(kind);
            self.graph
                .run(query(&format!(
                    "CREATE VECTOR INDEX {index} IF NOT EXISTS \
                     FOR (n:{label}) ON (n.embedding) \
                     OPTIONS {{indexConfig: {{`vector.dimensions`: {dims}, \
                     `vector.similarity_function`: 'cosine'}}}}",
                    dims = self.dimensions
                )))
                .await
                .map_err(map_backend)?;
        }
        debug!("schema initialized for {} labels", NodeKind::ALL.len());
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
