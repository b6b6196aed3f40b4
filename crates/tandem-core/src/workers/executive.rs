//! Executive Worker
//!
//! Evaluates the Speaker's accumulated output against the knowledge graph and
//! returns a verdict: let it run, or interject corrective material. Also
//! writes each finished exchange back into the graph so later requests can
//! retrieve it.
//!
//! Evaluation never fails outward: retrieval errors and unparseable model
//! output both degrade to `action = none` with whatever document text was
//! gathered.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::graph::{NodeKind, NodeRef, Result};
use crate::knowledge::{KnowledgeDocument, KnowledgeTools};
use crate::llm::{extract_json, ChatBackend, ChatMessage, ChatParams};

/// Topic retrieval parameters (step 1 of the protocol)
const TOPIC_K: usize = 5;
const TOPIC_MIN_SCORE: f32 = 0.6;

/// Knowledge fallback parameters (step 2)
const KNOWLEDGE_K: usize = 5;
const KNOWLEDGE_MIN_SCORE: f32 = 0.5;

/// Per-topic hybrid expansion parameters (step 3)
const HYBRID_K: usize = 5;
const HYBRID_MIN_SCORE: f32 = 0.6;

const SYSTEM_DIRECTIVE: &str = "\
You are a background supervisor watching another assistant answer a user. \
Compare the assistant's partial answer against the reference knowledge below. \
If the answer contradicts the reference knowledge, respond with action \
\"interrupt\" and put the corrective material in \"document\". Otherwise \
respond with action \"none\". Respond ONLY with a JSON object of the form \
{\"action\": \"none\" | \"interrupt\", \"reason\": \"...\", \"document\": \"...\"}.";

/// What the Executive decided for one evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvalAction {
    None,
    Interrupt,
}

/// The `{action, reason, document}` triple returned per evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalVerdict {
    pub action: EvalAction,
    pub reason: String,
    /// Corrective content forwarded to the client on interrupt
    pub document: String,
}

impl EvalVerdict {
    pub fn none(reason: impl Into<String>, document: impl Into<String>) -> Self {
        Self {
            action: EvalAction::None,
            reason: reason.into(),
            document: document.into(),
        }
    }
}

/// The background worker
pub struct Executive {
    tools: Arc<KnowledgeTools>,
    llm: Arc<dyn ChatBackend>,
    model: String,
}

impl Executive {
    pub fn new(tools: Arc<KnowledgeTools>, llm: Arc<dyn ChatBackend>, model: impl Into<String>) -> Self {
        Self {
            tools,
            llm,
            model: model.into(),
        }
    }

    /// Run the retrieval protocol for `query`: topics first, knowledge
    /// fallback when no topic matches, then hybrid expansion per topic.
    pub async fn retrieve(&self, query: &str) -> KnowledgeDocument {
        let topics = match self
            .tools
            .vector_search(NodeKind::Topic, query, Some(TOPIC_K), Some(TOPIC_MIN_SCORE))
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                warn!("topic retrieval failed: {e}");
                return KnowledgeDocument::default();
            }
        };

        let mut items = Vec::new();
        if topics.is_empty() {
            match self
                .tools
                .vector_search(
                    NodeKind::Knowledge,
                    query,
                    Some(KNOWLEDGE_K),
                    Some(KNOWLEDGE_MIN_SCORE),
                )
                .await
            {
                Ok(hits) => items.extend(hits),
                Err(e) => warn!("knowledge fallback retrieval failed: {e}"),
            }
        } else {
            for topic in &topics {
                match self
                    .tools
                    .hybrid_search(
                        NodeKind::Topic,
                        &topic.name,
                        crate::graph::BELONGS_TO,
                        NodeKind::Knowledge,
                        Some(HYBRID_K),
                        Some(HYBRID_MIN_SCORE),
                    )
                    .await
                {
                    Ok(hits) => items.extend(KnowledgeDocument::items_from_hybrid(&hits)),
                    Err(e) => warn!("hybrid expansion failed for topic '{}': {e}", topic.name),
                }
            }
        }

        KnowledgeDocument::fold(topics, items)
    }

    /// Evaluate the Speaker's accumulated output. Infallible: every failure
    /// path degrades to the default `none` verdict.
    pub async fn evaluate(
        &self,
        query: &str,
        conversation: &[ChatMessage],
        speaker_output: &str,
    ) -> EvalVerdict {
        let document = self.retrieve(query).await;
        self.reason(query, conversation, speaker_output, &document)
            .await
    }

    async fn reason(
        &self,
        query: &str,
        conversation: &[ChatMessage],
        speaker_output: &str,
        document: &KnowledgeDocument,
    ) -> EvalVerdict {
        let mut messages = vec![ChatMessage::system(SYSTEM_DIRECTIVE)];
        messages.extend(conversation.iter().cloned());
        messages.push(ChatMessage::system(format!(
            "Reference knowledge:\n{}\n\nUser query: {}\n\nAssistant output so far:\n{}",
            if document.text.is_empty() {
                "(none)"
            } else {
                &document.text
            },
            query,
            speaker_output,
        )));

        let params = ChatParams {
            model: self.model.clone(),
            messages,
            temperature: Some(0.0),
            ..Default::default()
        };

        let response = match self.llm.complete(params).await {
            Ok(text) => text,
            Err(e) => {
                warn!("executive reasoning failed: {e}");
                return EvalVerdict::none(format!("reasoning failed: {e}"), document.text.clone());
            }
        };

        match parse_verdict(&response) {
            Some(verdict) => verdict,
            None => {
                debug!("unparseable executive response: {response}");
                EvalVerdict::none("parse failure", document.text.clone())
            }
        }
    }

    /// Write the finished exchange back into the graph: locate or create the
    /// Topic matching the user query, then attach a fresh Knowledge node.
    /// Every exchange creates a new node; only the Topic deduplicates.
    pub async fn record_exchange(&self, query: &str, assistant_text: &str) -> Result<()> {
        let topic_exists = self
            .tools
            .find_by_name(NodeKind::Topic, query)
            .await?
            .is_some();
        if !topic_exists {
            self.tools
                .create_node(
                    NodeKind::Topic,
                    query,
                    "topic created from a conversation exchange",
                    None,
                    Vec::new(),
                    BTreeMap::new(),
                )
                .await?;
        }

        let name = format!("exchange-{}", Uuid::new_v4());
        let description = format!("user: {query}\nassistant: {assistant_text}");
        self.tools
            .create_node(
                NodeKind::Knowledge,
                &name,
                &description,
                Some(query.to_string()),
                vec![NodeRef::new(NodeKind::Topic, query)],
                BTreeMap::new(),
            )
            .await?;
        debug!("recorded exchange under topic '{query}'");
        Ok(())
    }
}

/// Parse a verdict from raw model output, tolerating code fences. An unknown
/// `action` string parses as `none` rather than guessing.
fn parse_verdict(response: &str) -> Option<EvalVerdict> {
    let value = extract_json(response)?;
    let action = match value.get("action").and_then(|v| v.as_str()) {
        Some("interrupt") => EvalAction::Interrupt,
        Some(_) => EvalAction::None,
        None => return None,
    };
    Some(EvalVerdict {
        action,
        reason: value
            .get("reason")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        document: value
            .get("document")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
    })
}
