//! OpenAI Chunk Schema & SSE Framing
//!
//! Wire structs matching `chat.completion.chunk` / `chat.completion`, plus the
//! `data: <json>\n\n` framing. The `[DONE]` sentinel is byte-exact: every
//! streaming response ends with `data: [DONE]\n\n` and nothing after it.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::llm::ToolCallChunk;

/// One streamed delta on the wire
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallChunk>>,
}

/// One choice of a chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: ChunkDelta,
    pub finish_reason: Option<String>,
}

/// `chat.completion.chunk`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

/// Final message of a non-streaming response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionMessage {
    pub role: String,
    pub content: String,
}

/// One choice of a non-streaming response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionChoice {
    pub index: u32,
    pub message: CompletionMessage,
    pub finish_reason: Option<String>,
}

/// Token usage block. Exact token accounting is out of scope; counts are
/// whitespace estimates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// `chat.completion`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<CompletionChoice>,
    pub usage: Usage,
}

// ============================================================================
// CHUNK FACTORY
// ============================================================================

/// Stamps every chunk of one request with the same id/model/created triple
#[derive(Debug, Clone)]
pub struct ChunkFactory {
    id: String,
    model: String,
    created: i64,
}

impl ChunkFactory {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            id: format!("chatcmpl-{}", Uuid::new_v4().simple()),
            model: model.into(),
            created: Utc::now().timestamp(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn chunk(&self, delta: ChunkDelta, finish_reason: Option<String>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
        }
    }

    /// The opening chunk of a stream carries the assistant role
    pub fn role(&self) -> ChatCompletionChunk {
        self.chunk(
            ChunkDelta {
                role: Some("assistant".to_string()),
                ..Default::default()
            },
            None,
        )
    }

    pub fn content(&self, text: impl Into<String>) -> ChatCompletionChunk {
        self.chunk(
            ChunkDelta {
                content: Some(text.into()),
                ..Default::default()
            },
            None,
        )
    }

    pub fn tool_calls(&self, calls: Vec<ToolCallChunk>) -> ChatCompletionChunk {
        self.chunk(
            ChunkDelta {
                tool_calls: Some(calls),
                ..Default::default()
            },
            None,
        )
    }

    pub fn finish(&self, reason: impl Into<String>) -> ChatCompletionChunk {
        self.chunk(ChunkDelta::default(), Some(reason.into()))
    }

    /// Failure chunk: error text and `finish_reason=stop` in one chunk, so a
    /// failing stream still carries exactly one finish marker before `[DONE]`
    pub fn error(&self, message: impl Into<String>) -> ChatCompletionChunk {
        self.chunk(
            ChunkDelta {
                content: Some(message.into()),
                ..Default::default()
            },
            Some("stop".to_string()),
        )
    }

    /// Compose the non-streaming response object
    pub fn completion(&self, content: String, finish_reason: &str) -> ChatCompletion {
        let completion_tokens = estimate_tokens(&content);
        ChatCompletion {
            id: self.id.clone(),
            object: "chat.completion".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![CompletionChoice {
                index: 0,
                message: CompletionMessage {
                    role: "assistant".to_string(),
                    content,
                },
                finish_reason: Some(finish_reason.to_string()),
            }],
            usage: Usage {
                prompt_tokens: 0,
                completion_tokens,
                total_tokens: completion_tokens,
            },
        }
    }
}

/// Whitespace token estimate (exact accounting is a non-goal)
pub fn estimate_tokens(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}

// ============================================================================
// FRAMING
// ============================================================================

/// Frame one chunk as an SSE line
pub fn frame(chunk: &ChatCompletionChunk) -> String {
    format!(
        "data: {}\n\n",
        serde_json::to_string(chunk).unwrap_or_default()
    )
}

/// The terminal sentinel line
pub fn done_frame() -> &'static str {
    "data: [DONE]\n\n"
}

// ============================================================================
// TESTS
// ============================================================================
