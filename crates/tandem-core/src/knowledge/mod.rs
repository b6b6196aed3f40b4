//! Knowledge Layer
//!
//! The contract layer the workers and the external API consume: a closed set
//! of tools over the graph store, plus the retrieval document type the
//! Executive folds search results into.

mod tools;

pub use tools::{KnowledgeTools, NodeCreated, ToolCall};

use serde::{Deserialize, Serialize};

use crate::graph::{HybridHit, ScoredNode};

/// A topic matched during retrieval
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicHit {
    pub name: String,
    pub description: String,
    pub score: f32,
}

/// One knowledge item gathered for a query
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeItem {
    pub name: String,
    pub description: String,
    pub score: f32,
}

/// The folded result of the Executive's retrieval protocol. May be empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeDocument {
    pub topics: Vec<TopicHit>,
    pub items: Vec<KnowledgeItem>,
    /// Rendered text handed to the LLM workers
    pub text: String,
}

impl KnowledgeDocument {
    /// Fold topic hits and accumulated knowledge hits into a document whose
    /// `text` lists each item with its similarity score.
    pub fn fold(topics: Vec<ScoredNode>, items: Vec<ScoredNode>) -> Self {
        let topics: Vec<TopicHit> = topics
            .into_iter()
            .map(|t| TopicHit {
                name: t.name,
                description: t.description,
                score: t.score,
            })
            .collect();
        let items: Vec<KnowledgeItem> = items
            .into_iter()
            .map(|i| KnowledgeItem {
                name: i.name,
                description: i.description,
                score: i.score,
            })
            .collect();

        let mut text = String::new();
        for item in &items {
            text.push_str(&format!(
                "- {} ({:.2}): {}\n",
                item.name, item.score, item.description
            ));
        }
        Self {
            topics,
            items,
            text,
        }
    }

    /// Collect the knowledge targets of hybrid rows into plain items
    pub fn items_from_hybrid(hits: &[HybridHit]) -> Vec<ScoredNode> {
        hits.iter().map(|h| h.target.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty() && self.items.is_empty()
    }
}
