//! POST /v1/chat/completions
//!
//! OpenAI-compatible surface over the orchestrator. Streaming responses are
//! written as raw `text/event-stream` bodies built from the core's SSE
//! framing, so the `[DONE]` sentinel is byte-exact.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;

use tandem_core::{done_frame, frame, ChatMessage, ChatRequest, OutEvent};

use crate::error::ApiError;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct WireMessage {
    pub role: String,
    #[serde(default)]
    pub content: Value,
}

#[derive(Debug, Deserialize)]
pub struct WireChatRequest {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub messages: Option<Vec<WireMessage>>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub presence_penalty: Option<f32>,
    #[serde(default)]
    pub frequency_penalty: Option<f32>,
    #[serde(default)]
    pub stream: Option<bool>,
    #[serde(default)]
    pub tools: Option<Value>,
    #[serde(default)]
    pub tool_choice: Option<Value>,
    #[serde(default)]
    pub response_format: Option<Value>,
}

/// Flatten string-or-multipart message content to plain text. Multipart
/// arrays contribute their `type == "text"` parts in order.
pub fn flatten_content(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter(|part| part.get("type").and_then(|t| t.as_str()) == Some("text"))
            .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

fn normalize(body: WireChatRequest) -> Result<ChatRequest, ApiError> {
    let messages = body.messages.unwrap_or_default();
    if messages.is_empty() {
        return Err(ApiError::invalid_request(
            "messages must be a non-empty array",
            Some("messages"),
            "invalid_messages",
        ));
    }

    let messages: Vec<ChatMessage> = messages
        .iter()
        .map(|m| ChatMessage {
            role: m.role.clone(),
            content: flatten_content(&m.content),
        })
        .collect();

    Ok(ChatRequest {
        model: body.model.unwrap_or_else(|| "tandem".to_string()),
        messages,
        temperature: body.temperature,
        top_p: body.top_p,
        max_tokens: body.max_tokens,
        presence_penalty: body.presence_penalty,
        frequency_penalty: body.frequency_penalty,
        tools: body.tools,
        tool_choice: body.tool_choice,
        response_format: body.response_format,
        stream: body.stream.unwrap_or(false),
    })
}

pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    Json(body): Json<WireChatRequest>,
) -> Result<Response, ApiError> {
    let request = normalize(body)?;

    if request.stream {
        let debug = state.config.debug;
        let events = state.orchestrator.stream_events(request);
        let frames = events.map(move |event| {
            let framed = match event {
                OutEvent::Chunk(chunk) => frame(&chunk),
                OutEvent::Done => done_frame().to_string(),
            };
            if debug {
                tracing::debug!("sse frame: {}", framed.trim_end());
            }
            Ok::<Bytes, Infallible>(Bytes::from(framed))
        });

        let response = Response::builder()
            .header(header::CONTENT_TYPE, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .header(header::CONNECTION, "keep-alive")
            .body(Body::from_stream(frames))
            .map_err(|e| ApiError::internal(e.to_string()))?;
        Ok(response)
    } else {
        let completion = state
            .orchestrator
            .complete(request)
            .await
            .map_err(|e| ApiError::internal(e.to_string()))?;
        Ok(Json(completion).into_response())
    }
}
