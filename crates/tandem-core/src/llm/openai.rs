//! OpenAI-compatible upstream client
//!
//! Speaks the `/chat/completions` wire format against any OpenAI-compatible
//! base URL (OpenAI, OpenRouter, Ollama, ...). Streaming responses are parsed
//! from the `data: <json>\n\n` SSE framing; the `[DONE]` sentinel ends the
//! stream.

use async_stream::stream;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ChatBackend, ChatParams, Delta, LlmError, ToolCallChunk};

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [super::ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<&'a Value>,
}

#[derive(Debug, Deserialize)]
struct WireChunk {
    choices: Vec<WireChoice>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    delta: WireDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallChunk>>,
}

/// Reqwest-backed OpenAI-compatible chat client
#[derive(Clone)]
pub struct OpenAiBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiBackend {
    /// `base_url` is the API root (e.g. `https://openrouter.ai/api/v1`);
    /// `/chat/completions` is appended per call.
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn request_builder(&self) -> reqwest::RequestBuilder {
        let mut builder = self.client.post(self.endpoint());
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }
        builder
    }

    fn wire_body(params: &ChatParams, stream: bool) -> Value {
        serde_json::to_value(WireRequest {
            model: &params.model,
            messages: &params.messages,
            stream,
            temperature: params.temperature,
            top_p: params.top_p,
            max_tokens: params.max_tokens,
            presence_penalty: params.presence_penalty,
            frequency_penalty: params.frequency_penalty,
            tools: params.tools.as_ref(),
            tool_choice: params.tool_choice.as_ref(),
            response_format: params.response_format.as_ref(),
        })
        .unwrap_or_default()
    }
}

#[async_trait]
impl ChatBackend for OpenAiBackend {
    fn stream_chat(&self, params: ChatParams) -> BoxStream<'static, Result<Delta, LlmError>> {
        let builder = self.request_builder();
        let body = Self::wire_body(&params, true);

        stream! {
            let response = match builder.json(&body).send().await {
                Ok(resp) => resp,
                Err(e) => {
                    yield Err(LlmError::Request(e.to_string()));
                    return;
                }
            };

            if !response.status().is_success() {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                let snippet: String = text.chars().take(600).collect();
                yield Err(LlmError::Upstream(format!("{status} — {snippet}")));
                return;
            }

            let mut bytes = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(LlmError::Stream(e.to_string()));
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                // Parse SSE framing: "data: {...}\n\n"
                while let Some(end_idx) = buffer.find("\n\n") {
                    let line = buffer[..end_idx].to_string();
                    buffer = buffer[end_idx + 2..].to_string();

                    let Some(payload) = line.trim_start().strip_prefix("data: ") else {
                        continue;
                    };
                    if payload == "[DONE]" {
                        return;
                    }
                    match serde_json::from_str::<WireChunk>(payload) {
                        Ok(parsed) => {
                            if let Some(choice) = parsed.choices.into_iter().next() {
                                yield Ok(Delta {
                                    content: choice.delta.content,
                                    tool_calls: choice.delta.tool_calls,
                                    finish_reason: choice.finish_reason,
                                });
                            }
                        }
                        // Skip malformed chunks
                        Err(_) => continue,
                    }
                }
            }
        }
        .boxed()
    }

    async fn complete(&self, params: ChatParams) -> Result<String, LlmError> {
        let body = Self::wire_body(&params, false);
        let response = self
            .request_builder()
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            let snippet: String = text.chars().take(600).collect();
            return Err(LlmError::Upstream(format!("{status} — {snippet}")));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| LlmError::Stream(e.to_string()))?;

        json["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| LlmError::Upstream("no content in response".to_string()))
    }
}
