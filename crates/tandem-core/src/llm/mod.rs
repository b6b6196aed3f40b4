//! LLM Adapter Seam
//!
//! The workers treat the underlying model as an opaque capability that
//! accepts a message list and emits a token stream. [`ChatBackend`] is that
//! seam; the production implementation is [`OpenAiBackend`], tests substitute
//! scripted backends.

mod json;
mod openai;

pub use json::extract_json;
pub use openai::OpenAiBackend;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// LLM adapter error
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum LlmError {
    /// Transport or HTTP failure
    #[error("request failed: {0}")]
    Request(String),
    /// Upstream returned a non-success status
    #[error("upstream error: {0}")]
    Upstream(String),
    /// The stream broke mid-response
    #[error("stream error: {0}")]
    Stream(String),
}

/// One chat message on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// A streamed tool-call fragment, forwarded unmodified to the client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallChunk {
    pub index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<Value>,
}

/// One item of the Speaker's delta sequence
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Delta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(rename = "tool_calls", skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallChunk>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

impl Delta {
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            ..Default::default()
        }
    }
}

/// Parameters of one upstream chat call
#[derive(Debug, Clone, Default)]
pub struct ChatParams {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    pub presence_penalty: Option<f32>,
    pub frequency_penalty: Option<f32>,
    /// Forwarded unchanged
    pub tools: Option<Value>,
    /// Forwarded unchanged
    pub tool_choice: Option<Value>,
    /// Forwarded unchanged unless it selects JSON mode (handled upstream of
    /// the adapter)
    pub response_format: Option<Value>,
}

/// The opaque chat capability both workers are written against
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Stream deltas for a chat call. The sequence is finite and
    /// non-restartable; callers drain it fully unless cancelled.
    fn stream_chat(&self, params: ChatParams) -> BoxStream<'static, Result<Delta, LlmError>>;

    /// One-shot completion returning the full assistant message content
    async fn complete(&self, params: ChatParams) -> Result<String, LlmError>;
}
