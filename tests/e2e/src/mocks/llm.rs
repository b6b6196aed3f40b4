//! Scripted LLM backends
//!
//! The Speaker backend replays a fixed delta script; the Executive backend
//! answers `complete` calls through a caller-supplied responder so tests can
//! make the verdict depend on the speaker output under evaluation.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;

use tandem_core::{ChatBackend, ChatParams, Delta, LlmError};

/// Split text into `pieces` nearly-equal content deltas, mirroring upstream
/// token streaming
pub fn split_deltas(text: &str, pieces: usize) -> Vec<Delta> {
    let chars: Vec<char> = text.chars().collect();
    let pieces = pieces.max(1).min(chars.len().max(1));
    let base = chars.len() / pieces;
    let remainder = chars.len() % pieces;
    let mut deltas = Vec::with_capacity(pieces);
    let mut cursor = 0;
    for i in 0..pieces {
        let len = base + usize::from(i < remainder);
        let piece: String = chars[cursor..cursor + len].iter().collect();
        cursor += len;
        if !piece.is_empty() {
            deltas.push(Delta::content(piece));
        }
    }
    deltas
}

/// Speaker backend replaying a scripted delta sequence
pub struct ScriptedSpeakerLlm {
    script: Vec<Result<Delta, LlmError>>,
    /// Pause between deltas, for cancellation tests
    delay: Duration,
    /// The params of the most recent `stream_chat` call, for augmentation
    /// assertions
    last_params: Arc<Mutex<Option<ChatParams>>>,
}

impl ScriptedSpeakerLlm {
    pub fn new(script: Vec<Delta>) -> Self {
        Self {
            script: script.into_iter().map(Ok).collect(),
            delay: Duration::ZERO,
            last_params: Arc::new(Mutex::new(None)),
        }
    }

    /// Script that fails mid-stream after the given deltas
    pub fn failing_after(script: Vec<Delta>, error: LlmError) -> Self {
        let mut items: Vec<Result<Delta, LlmError>> = script.into_iter().map(Ok).collect();
        items.push(Err(error));
        Self {
            script: items,
            delay: Duration::ZERO,
            last_params: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn last_params(&self) -> Option<ChatParams> {
        self.last_params.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatBackend for ScriptedSpeakerLlm {
    fn stream_chat(&self, params: ChatParams) -> BoxStream<'static, Result<Delta, LlmError>> {
        *self.last_params.lock().unwrap() = Some(params);
        let script = self.script.clone();
        let delay = self.delay;
        stream! {
            for item in script {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                yield item;
            }
        }
        .boxed()
    }

    async fn complete(&self, params: ChatParams) -> Result<String, LlmError> {
        *self.last_params.lock().unwrap() = Some(params);
        let mut text = String::new();
        for item in &self.script {
            if let Ok(delta) = item {
                if let Some(content) = &delta.content {
                    text.push_str(content);
                }
            }
        }
        Ok(text)
    }
}

type Responder = dyn Fn(&ChatParams) -> String + Send + Sync;

/// Executive backend answering through a responder closure
pub struct ScriptedExecutiveLlm {
    responder: Arc<Responder>,
    /// Latency before answering, for supersession/cancellation tests
    delay: Duration,
    calls: Arc<Mutex<usize>>,
}

impl ScriptedExecutiveLlm {
    pub fn new(responder: impl Fn(&ChatParams) -> String + Send + Sync + 'static) -> Self {
        Self {
            responder: Arc::new(responder),
            delay: Duration::ZERO,
            calls: Arc::new(Mutex::new(0)),
        }
    }

    /// Verdict is always `none`
    pub fn always_none() -> Self {
        Self::new(|_| r#"{"action": "none", "reason": "consistent", "document": ""}"#.to_string())
    }

    /// Verdict is `interrupt` with `document` whenever the evaluated speaker
    /// output contains `trigger`
    pub fn interrupt_when(trigger: &str, document: &str) -> Self {
        let trigger = trigger.to_string();
        let document = document.to_string();
        Self::new(move |params: &ChatParams| {
            let evaluated = params
                .messages
                .last()
                .map(|m| m.content.as_str())
                .unwrap_or_default();
            if evaluated.contains(&trigger) {
                format!(
                    r#"{{"action": "interrupt", "reason": "contradicts stored knowledge", "document": "{document}"}}"#
                )
            } else {
                r#"{"action": "none", "reason": "consistent", "document": ""}"#.to_string()
            }
        })
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl ChatBackend for ScriptedExecutiveLlm {
    fn stream_chat(&self, _params: ChatParams) -> BoxStream<'static, Result<Delta, LlmError>> {
        futures::stream::empty().boxed()
    }

    async fn complete(&self, params: ChatParams) -> Result<String, LlmError> {
        *self.calls.lock().unwrap() += 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok((self.responder)(&params))
    }
}
