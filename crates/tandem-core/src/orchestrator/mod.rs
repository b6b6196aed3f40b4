//! Dual-Worker Orchestrator
//!
//! Owns the lifecycle of one chat request:
//!
//! 1. prefetch knowledge context and splice it into the Speaker's messages
//! 2. launch the Speaker stream and the first Executive evaluation together
//! 3. forward Speaker deltas in production order, re-evaluating with the
//!    Executive every `REEVAL_STRIDE` accumulated characters
//! 4. splice at most one Executive interruption between two Speaker chunks
//! 5. after the Speaker ends, apply the final outstanding verdict, then close
//!    with a finish chunk and the `[DONE]` sentinel
//!
//! Ordering guarantees: tokens keep FIFO order, an interruption chunk lands
//! strictly between Speaker chunks, tool-call chunks are never preempted.
//! The client stream never terminates without `[DONE]`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::graph::NodeKind;
use crate::knowledge::{KnowledgeDocument, KnowledgeTools};
use crate::llm::{extract_json, ChatMessage, ChatParams};
use crate::sse::{ChatCompletion, ChatCompletionChunk, ChunkFactory};
use crate::workers::{EvalAction, EvalVerdict, Executive, Speaker};

/// Characters of accumulated Speaker output between Executive re-evaluations
pub const DEFAULT_REEVAL_STRIDE: usize = 100;

/// Prefetch parameters for the Speaker's knowledge context
const PREFETCH_K: usize = 3;
const PREFETCH_MIN_SCORE: f32 = 0.6;

// ============================================================================
// REQUEST & CONFIG
// ============================================================================

/// A normalized chat request, already validated by the surface layer
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// Echoed in the `model` field of emitted chunks
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    pub presence_penalty: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub tools: Option<Value>,
    pub tool_choice: Option<Value>,
    pub response_format: Option<Value>,
    pub stream: bool,
}

impl ChatRequest {
    /// The content of the last user message
    pub fn user_query(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }

    /// Whether `response_format` selects JSON-object mode
    pub fn json_mode(&self) -> bool {
        self.response_format
            .as_ref()
            .and_then(|f| f.get("type"))
            .and_then(|t| t.as_str())
            .map(|t| t == "json_object")
            .unwrap_or(false)
    }

    fn chat_params(&self) -> ChatParams {
        ChatParams {
            model: String::new(), // each worker sets its own
            messages: self.messages.clone(),
            temperature: self.temperature,
            top_p: self.top_p,
            max_tokens: self.max_tokens,
            presence_penalty: self.presence_penalty,
            frequency_penalty: self.frequency_penalty,
            tools: self.tools.clone(),
            tool_choice: self.tool_choice.clone(),
            response_format: self.response_format.clone(),
        }
    }
}

/// Orchestrator tunables
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Characters between Executive re-evaluations
    pub reeval_stride: usize,
    /// Per-request wall-clock bound
    pub request_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            reeval_stride: DEFAULT_REEVAL_STRIDE,
            request_timeout: Duration::from_secs(120),
        }
    }
}

/// One item of the outbound event stream
#[derive(Debug, Clone)]
pub enum OutEvent {
    Chunk(ChatCompletionChunk),
    /// The `[DONE]` sentinel; always the last event, exactly once
    Done,
}

/// Failures the surface layer must turn into HTTP errors (non-streaming only;
/// streaming failures become error chunks)
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("speaker failed: {0}")]
    Speaker(String),
    #[error("request timed out")]
    Timeout,
}

// ============================================================================
// EXECUTIVE CHAIN
// ============================================================================

/// The chain of Executive evaluations for one request. Exactly one task is
/// "latest"; spawning a successor drops the predecessor's receiver, so its
/// verdict is never consumed while its writeback still runs to completion.
struct ExecChain {
    executive: Arc<Executive>,
    query: String,
    conversation: Vec<ChatMessage>,
    writeback_lock: Arc<Mutex<()>>,
    cancelled: Arc<AtomicBool>,
    latest: Option<oneshot::Receiver<EvalVerdict>>,
    /// Accumulated length the latest evaluation was spawned against
    last_spawn_len: usize,
}

impl ExecChain {
    fn new(executive: Arc<Executive>, query: String, conversation: Vec<ChatMessage>, cancelled: Arc<AtomicBool>) -> Self {
        Self {
            executive,
            query,
            conversation,
            writeback_lock: Arc::new(Mutex::new(())),
            cancelled,
            latest: None,
            last_spawn_len: 0,
        }
    }

    /// Spawn the next evaluation against the latest accumulated output,
    /// superseding the previous one.
    fn spawn(&mut self, speaker_output: String) {
        self.last_spawn_len = speaker_output.len();
        let executive = self.executive.clone();
        let query = self.query.clone();
        let conversation = self.conversation.clone();
        let lock = self.writeback_lock.clone();
        let cancelled = self.cancelled.clone();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let verdict = executive
                .evaluate(&query, &conversation, &speaker_output)
                .await;
            let _ = tx.send(verdict);

            // Best-effort writeback: serialized per request, skipped once
            // cancellation is observed, never skipped mid-write.
            if speaker_output.is_empty() || cancelled.load(Ordering::Acquire) {
                return;
            }
            let _guard = lock.lock().await;
            if cancelled.load(Ordering::Acquire) {
                return;
            }
            if let Err(e) = executive.record_exchange(&query, &speaker_output).await {
                warn!("writeback failed: {e}");
            }
        });

        self.latest = Some(rx);
    }

    /// Non-blocking poll of the latest task's verdict
    fn try_verdict(&mut self) -> Option<EvalVerdict> {
        let rx = self.latest.as_mut()?;
        match rx.try_recv() {
            Ok(verdict) => {
                self.latest = None;
                Some(verdict)
            }
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                self.latest = None;
                None
            }
        }
    }

    /// Await the latest outstanding task to completion. When the Speaker
    /// produced output past the last evaluation point, a final evaluation of
    /// the complete text is spawned first, so the closing verdict always
    /// reflects what the client actually received.
    async fn final_verdict(&mut self, accumulated: &str) -> Option<EvalVerdict> {
        if accumulated.len() > self.last_spawn_len || self.latest.is_none() {
            self.spawn(accumulated.to_string());
        }
        let rx = self.latest.take()?;
        rx.await.ok()
    }
}

/// Sets the request's cancellation flag when the outbound stream is dropped
/// before completing (client disconnect).
struct CancelGuard {
    cancelled: Arc<AtomicBool>,
    armed: bool,
}

impl CancelGuard {
    fn new(cancelled: Arc<AtomicBool>) -> Self {
        Self {
            cancelled,
            armed: true,
        }
    }

    /// Called on normal completion so pending writebacks still run
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if self.armed {
            self.cancelled.store(true, Ordering::Release);
        }
    }
}

fn interruption_text(document: &str) -> String {
    format!("\n\n[Executive Interruption: {document}]")
}

/// Prefetch knowledge context for the Speaker. Zero results is legal;
/// failure logs and proceeds without context.
async fn prefetch(tools: &KnowledgeTools, query: &str) -> Option<String> {
    if query.trim().is_empty() {
        return None;
    }
    match tools
        .vector_search(
            NodeKind::Knowledge,
            query,
            Some(PREFETCH_K),
            Some(PREFETCH_MIN_SCORE),
        )
        .await
    {
        Ok(hits) if !hits.is_empty() => Some(KnowledgeDocument::fold(Vec::new(), hits).text),
        Ok(_) => None,
        Err(e) => {
            warn!("prefetch failed, proceeding without knowledge context: {e}");
            None
        }
    }
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

/// The dual-worker orchestrator (one instance serves all requests)
pub struct Orchestrator {
    tools: Arc<KnowledgeTools>,
    speaker: Arc<Speaker>,
    executive: Arc<Executive>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        tools: Arc<KnowledgeTools>,
        speaker: Arc<Speaker>,
        executive: Arc<Executive>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            tools,
            speaker,
            executive,
            config,
        }
    }

    /// The streaming mode: an event stream the surface layer frames as SSE.
    /// Every path through the stream ends with exactly one [`OutEvent::Done`].
    pub fn stream_events(&self, request: ChatRequest) -> BoxStream<'static, OutEvent> {
        let tools = self.tools.clone();
        let speaker = self.speaker.clone();
        let executive = self.executive.clone();
        let config = self.config.clone();

        stream! {
            let factory = ChunkFactory::new(request.model.clone());
            let json_mode = request.json_mode();
            let stride = config.reeval_stride.max(1);
            let deadline = Instant::now() + config.request_timeout;

            let query = request.user_query().to_string();
            let cancelled = Arc::new(AtomicBool::new(false));
            let mut cancel_guard = CancelGuard::new(cancelled.clone());

            // 1. Prefetch
            let knowledge_text = prefetch(&tools, &query).await;

            // 2. Launch both workers
            let mut speaker_stream =
                speaker.stream(request.chat_params(), knowledge_text.as_deref());
            let mut chain = ExecChain::new(
                executive,
                query,
                request.messages.clone(),
                cancelled.clone(),
            );
            chain.spawn(String::new());

            yield OutEvent::Chunk(factory.role());

            let mut accumulated = String::new();
            let mut stride_mark = 0usize;
            let mut interrupted = false;
            let mut pending_interruption: Option<String> = None;
            let mut tool_call_in_progress = false;
            let mut last_had_tool_calls = false;

            // 3. Forward loop
            loop {
                let next = match tokio::time::timeout_at(deadline, speaker_stream.next()).await {
                    Ok(item) => item,
                    Err(_) => {
                        yield OutEvent::Chunk(factory.error("Error: request timed out"));
                        yield OutEvent::Done;
                        return;
                    }
                };
                let Some(result) = next else { break };
                let delta = match result {
                    Ok(delta) => delta,
                    Err(e) => {
                        yield OutEvent::Chunk(factory.error(format!("Error: {e}")));
                        yield OutEvent::Done;
                        return;
                    }
                };

                if let Some(content) = &delta.content {
                    accumulated.push_str(content);
                }

                // Forward in production order; JSON mode buffers content
                if let Some(calls) = &delta.tool_calls {
                    last_had_tool_calls = true;
                    tool_call_in_progress = delta.finish_reason.is_none();
                    yield OutEvent::Chunk(factory.tool_calls(calls.clone()));
                } else {
                    if delta.content.is_some() {
                        last_had_tool_calls = false;
                        tool_call_in_progress = false;
                        if !json_mode {
                            yield OutEvent::Chunk(
                                factory.content(delta.content.clone().unwrap_or_default()),
                            );
                        }
                    }
                    if delta.finish_reason.is_some() {
                        tool_call_in_progress = false;
                    }
                }

                // A deferred interruption fires as soon as the tool call ends
                if !tool_call_in_progress && !interrupted && !json_mode {
                    if let Some(document) = pending_interruption.take() {
                        interrupted = true;
                        yield OutEvent::Chunk(factory.content(interruption_text(&document)));
                    }
                }

                // Executive re-check on every crossed stride boundary
                let strides = accumulated.len() / stride;
                if strides > stride_mark {
                    stride_mark = strides;
                    chain.spawn(accumulated.clone());
                }

                // Non-blocking verdict poll
                if let Some(verdict) = chain.try_verdict() {
                    if verdict.action == EvalAction::Interrupt {
                        if interrupted {
                            debug!("suppressed repeat interruption: {}", verdict.document);
                        } else if json_mode {
                            // A JSON-only response has no place for an
                            // interruption chunk
                            interrupted = true;
                            debug!("suppressed interruption in JSON mode: {}", verdict.document);
                        } else if tool_call_in_progress {
                            pending_interruption = Some(verdict.document);
                        } else {
                            interrupted = true;
                            yield OutEvent::Chunk(
                                factory.content(interruption_text(&verdict.document)),
                            );
                        }
                    }
                }
            }

            // Speaker ended: flush a deferred interruption
            if !interrupted && !json_mode {
                if let Some(document) = pending_interruption.take() {
                    interrupted = true;
                    yield OutEvent::Chunk(factory.content(interruption_text(&document)));
                }
            }

            // 4. Final verdict
            if !interrupted {
                match tokio::time::timeout_at(deadline, chain.final_verdict(&accumulated)).await {
                    Ok(Some(verdict)) if verdict.action == EvalAction::Interrupt => {
                        if json_mode {
                            debug!("suppressed interruption in JSON mode: {}", verdict.document);
                        } else {
                            yield OutEvent::Chunk(
                                factory.content(interruption_text(&verdict.document)),
                            );
                        }
                    }
                    Ok(_) => {}
                    Err(_) => warn!("final executive verdict timed out, treating as none"),
                }
            }

            // JSON mode: emit the collected payload as a single chunk
            if json_mode {
                let payload = match extract_json(&accumulated) {
                    Some(value) => value.to_string(),
                    None => serde_json::json!({
                        "error": "Failed to parse as JSON",
                        "content": accumulated,
                    })
                    .to_string(),
                };
                yield OutEvent::Chunk(factory.content(payload));
            }

            // 5. Terminate
            let finish = if last_had_tool_calls { "tool_calls" } else { "stop" };
            yield OutEvent::Chunk(factory.finish(finish));
            cancel_guard.disarm();
            yield OutEvent::Done;
        }
        .boxed()
    }

    /// The non-streaming mode: both workers run concurrently, the composed
    /// response carries the interruption appended to the message content.
    pub async fn complete(
        &self,
        request: ChatRequest,
    ) -> Result<ChatCompletion, OrchestratorError> {
        let factory = ChunkFactory::new(request.model.clone());
        let stride = self.config.reeval_stride.max(1);
        let deadline = Instant::now() + self.config.request_timeout;

        let query = request.user_query().to_string();
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut cancel_guard = CancelGuard::new(cancelled.clone());

        let knowledge_text = prefetch(&self.tools, &query).await;
        let mut speaker_stream = self
            .speaker
            .stream(request.chat_params(), knowledge_text.as_deref());
        let mut chain = ExecChain::new(
            self.executive.clone(),
            query,
            request.messages.clone(),
            cancelled,
        );
        chain.spawn(String::new());

        let mut accumulated = String::new();
        let mut stride_mark = 0usize;
        let mut last_had_tool_calls = false;

        loop {
            let next = tokio::time::timeout_at(deadline, speaker_stream.next())
                .await
                .map_err(|_| OrchestratorError::Timeout)?;
            let Some(result) = next else { break };
            let delta = result.map_err(|e| OrchestratorError::Speaker(e.to_string()))?;

            if let Some(content) = &delta.content {
                accumulated.push_str(content);
                last_had_tool_calls = false;
            }
            if delta.tool_calls.is_some() {
                last_had_tool_calls = true;
            }

            let strides = accumulated.len() / stride;
            if strides > stride_mark {
                stride_mark = strides;
                chain.spawn(accumulated.clone());
            }
        }

        let verdict = tokio::time::timeout_at(deadline, chain.final_verdict(&accumulated))
            .await
            .unwrap_or_else(|_| {
                warn!("final executive verdict timed out, treating as none");
                None
            });

        let mut content = accumulated;
        if let Some(verdict) = verdict {
            if verdict.action == EvalAction::Interrupt {
                content.push_str(&interruption_text(&verdict.document));
            }
        }

        let finish = if last_had_tool_calls { "tool_calls" } else { "stop" };
        cancel_guard.disarm();
        Ok(factory.completion(content, finish))
    }
}

// ============================================================================
// TESTS
// ============================================================================
