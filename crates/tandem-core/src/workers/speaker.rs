//! Speaker Worker
//!
//! Streams deltas from the underlying LLM given the request message list
//! augmented with retrieved knowledge. The augmentation inserts a system
//! message carrying the knowledge context immediately before the last user
//! message, so the model reads it as late instruction rather than early
//! preamble.

use std::sync::Arc;

use futures::stream::BoxStream;

use crate::llm::{ChatBackend, ChatMessage, ChatParams, Delta, LlmError};

/// The user-facing worker
pub struct Speaker {
    llm: Arc<dyn ChatBackend>,
    model: String,
}

impl Speaker {
    pub fn new(llm: Arc<dyn ChatBackend>, model: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
        }
    }

    /// The model identifier used in emitted chunks
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Begin streaming deltas for the request. `knowledge_text`, when
    /// non-empty, is spliced in as a system message.
    pub fn stream(
        &self,
        mut params: ChatParams,
        knowledge_text: Option<&str>,
    ) -> BoxStream<'static, Result<Delta, LlmError>> {
        params.model = self.model.clone();
        if let Some(text) = knowledge_text {
            if !text.trim().is_empty() {
                params.messages = augment(params.messages, text);
            }
        }
        self.llm.stream_chat(params)
    }
}

/// Insert the knowledge system message immediately before the last user
/// message. Without a user message it is appended.
fn augment(messages: Vec<ChatMessage>, knowledge_text: &str) -> Vec<ChatMessage> {
    let context = ChatMessage::system(format!(
        "Relevant knowledge retrieved for this request:\n{knowledge_text}"
    ));
    let last_user = messages.iter().rposition(|m| m.role == "user");
    let mut out = messages;
    match last_user {
        Some(index) => out.insert(index, context),
        None => out.push(context),
    }
    out
}
