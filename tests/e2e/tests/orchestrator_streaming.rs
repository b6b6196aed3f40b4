//! Orchestrator streaming scenarios
//!
//! Exercises the dual-worker loop end-to-end over scripted workers and the
//! in-memory graph: interruption placement, stream invariants, JSON mode,
//! failure framing, and cancellation.

use std::time::Duration;

use tandem_core::{Delta, LlmError, NodeKind, OutEvent};

use tandem_e2e_tests::harness::{
    self, contents, done_count, finish_reasons, interruptions, position_of, request, speaker_text,
};
use tandem_e2e_tests::mocks::{split_deltas, ScriptedExecutiveLlm, ScriptedSpeakerLlm};

const QUESTION: &str = "What is the capital of France?";

/// Every stream upholds: exactly one [DONE], exactly one finish_reason,
/// at most one interruption
fn assert_stream_invariants(events: &[OutEvent]) {
    assert_eq!(done_count(events), 1, "exactly one [DONE] per stream");
    assert!(
        matches!(events.last(), Some(OutEvent::Done)),
        "[DONE] is the last event"
    );
    assert_eq!(
        finish_reasons(events).len(),
        1,
        "exactly one finish_reason chunk"
    );
    assert!(
        interruptions(events).len() <= 1,
        "at most one interruption per request"
    );
}

#[tokio::test]
async fn correct_answer_streams_without_interruption() {
    let answer = "The capital of France is Paris.";
    let harness = harness::build(
        ScriptedSpeakerLlm::new(split_deltas(answer, 12)),
        ScriptedExecutiveLlm::interrupt_when("Lyon", "Paris is the capital of France"),
    );
    harness.seed_paris().await;

    let events = harness.run_stream(request(QUESTION)).await;

    assert_stream_invariants(&events);
    assert!(interruptions(&events).is_empty(), "no interruption expected");
    // Tokens are never reordered or dropped
    assert_eq!(speaker_text(&events), answer);
    assert_eq!(finish_reasons(&events), vec!["stop".to_string()]);
}

#[tokio::test]
async fn incorrect_answer_triggers_one_interruption() {
    let answer = "The capital of France is Lyon.";
    let harness = harness::build(
        ScriptedSpeakerLlm::new(split_deltas(answer, 12)),
        ScriptedExecutiveLlm::interrupt_when("Lyon", "Paris is the capital of France, not Lyon"),
    );
    harness.seed_paris().await;

    let events = harness.run_stream(request(QUESTION)).await;

    assert_stream_invariants(&events);
    let interruption = {
        let found = interruptions(&events);
        assert_eq!(found.len(), 1, "exactly one interruption");
        found.into_iter().next().unwrap()
    };
    assert!(interruption.contains("Paris"));
    assert!(interruption.starts_with("\n\n[Executive Interruption:"));

    // The interruption lands after streaming began and before [DONE]
    let first_content = position_of(&events, |c| !c.contains("[Executive Interruption:"))
        .expect("speaker content present");
    let interruption_at = position_of(&events, |c| c.contains("[Executive Interruption:"))
        .expect("interruption present");
    assert!(interruption_at > first_content);

    // Speaker tokens are intact around the interruption
    assert_eq!(speaker_text(&events), answer);
}

#[tokio::test]
async fn progressive_incorrectness_reevaluates_and_interrupts_once() {
    // Four deltas, stride 20: the evaluation chain fires mid-stream and the
    // closing verdict sees the full wrong answer
    let deltas = vec![
        Delta::content("The capital"),
        Delta::content(" of France"),
        Delta::content(" is Lyon"),
        Delta::content("."),
    ];
    let harness = harness::build_with_stride(
        ScriptedSpeakerLlm::new(deltas),
        ScriptedExecutiveLlm::interrupt_when("Lyon", "Paris is the capital of France"),
        20,
    );
    harness.seed_paris().await;

    let events = harness.run_stream(request(QUESTION)).await;

    assert_stream_invariants(&events);
    assert_eq!(interruptions(&events).len(), 1, "exactly one interruption");
    // Launch evaluation plus at least one re-evaluation fired
    assert!(
        harness.executive_llm.call_count() >= 2,
        "expected re-evaluations, saw {}",
        harness.executive_llm.call_count()
    );
}

#[tokio::test]
async fn json_mode_buffers_and_emits_single_parsed_chunk() {
    let harness = harness::build(
        ScriptedSpeakerLlm::new(vec![
            Delta::content("{\"a\":1, \"b\":"),
            Delta::content(" 2}"),
        ]),
        ScriptedExecutiveLlm::always_none(),
    );

    let mut req = request("Give me JSON");
    req.response_format = Some(serde_json::json!({"type": "json_object"}));
    let events = harness.run_stream(req).await;

    assert_stream_invariants(&events);
    let texts = contents(&events);
    assert_eq!(texts.len(), 1, "one content chunk, nothing forwarded early");
    let parsed: serde_json::Value = serde_json::from_str(&texts[0]).expect("valid JSON payload");
    assert_eq!(parsed, serde_json::json!({"a": 1, "b": 2}));
}

#[tokio::test]
async fn json_mode_suppresses_interruption_chunks() {
    // The Executive interrupts on this answer, but a JSON-only response must
    // stay a single assembled-JSON chunk
    let harness = harness::build(
        ScriptedSpeakerLlm::new(vec![
            Delta::content("{\"capital\":"),
            Delta::content(" \"Lyon\"}"),
        ]),
        ScriptedExecutiveLlm::interrupt_when("Lyon", "Paris is the capital of France"),
    );
    harness.seed_paris().await;

    let mut req = request(QUESTION);
    req.response_format = Some(serde_json::json!({"type": "json_object"}));
    let events = harness.run_stream(req).await;

    assert_stream_invariants(&events);
    assert!(interruptions(&events).is_empty(), "no interruption chunk in JSON mode");
    let texts = contents(&events);
    assert_eq!(texts.len(), 1, "single content chunk: {texts:?}");
    let parsed: serde_json::Value = serde_json::from_str(&texts[0]).expect("valid JSON payload");
    assert_eq!(parsed, serde_json::json!({"capital": "Lyon"}));
}

#[tokio::test]
async fn json_mode_parse_failure_reports_error_payload() {
    let harness = harness::build(
        ScriptedSpeakerLlm::new(vec![Delta::content("not json at all")]),
        ScriptedExecutiveLlm::always_none(),
    );

    let mut req = request("Give me JSON");
    req.response_format = Some(serde_json::json!({"type": "json_object"}));
    let events = harness.run_stream(req).await;

    assert_stream_invariants(&events);
    let texts = contents(&events);
    assert_eq!(texts.len(), 1);
    let parsed: serde_json::Value = serde_json::from_str(&texts[0]).unwrap();
    assert_eq!(parsed["error"], "Failed to parse as JSON");
    assert_eq!(parsed["content"], "not json at all");
}

#[tokio::test]
async fn speaker_failure_emits_error_chunk_then_done() {
    let harness = harness::build(
        ScriptedSpeakerLlm::failing_after(
            vec![Delta::content("The capital ")],
            LlmError::Upstream("502 Bad Gateway".to_string()),
        ),
        ScriptedExecutiveLlm::always_none(),
    );

    let events = harness.run_stream(request(QUESTION)).await;

    assert_eq!(done_count(&events), 1);
    assert!(matches!(events.last(), Some(OutEvent::Done)));
    assert_eq!(finish_reasons(&events), vec!["stop".to_string()]);
    let texts = contents(&events);
    assert!(
        texts.iter().any(|c| c.starts_with("Error: ")),
        "error chunk present: {texts:?}"
    );
}

#[tokio::test]
async fn tool_call_deltas_forward_and_finish_with_tool_calls() {
    let tool_chunk: tandem_core::ToolCallChunk = serde_json::from_value(serde_json::json!({
        "index": 0,
        "id": "call_1",
        "type": "function",
        "function": {"name": "get_weather", "arguments": "{\"city\":\"Paris\"}"},
    }))
    .unwrap();
    let harness = harness::build(
        ScriptedSpeakerLlm::new(vec![Delta {
            content: None,
            tool_calls: Some(vec![tool_chunk]),
            finish_reason: None,
        }]),
        ScriptedExecutiveLlm::always_none(),
    );

    let events = harness.run_stream(request("What's the weather in Paris?")).await;

    assert_eq!(done_count(&events), 1);
    assert_eq!(finish_reasons(&events), vec!["tool_calls".to_string()]);
    let forwarded = events.iter().any(|e| match e {
        OutEvent::Chunk(chunk) => chunk.choices[0]
            .delta
            .tool_calls
            .as_ref()
            .map(|calls| calls[0].id.as_deref() == Some("call_1"))
            .unwrap_or(false),
        OutEvent::Done => false,
    });
    assert!(forwarded, "tool-call chunk forwarded unmodified");
}

#[tokio::test]
async fn non_streaming_appends_interruption_to_content() {
    let answer = "The capital of France is Lyon.";
    let harness = harness::build(
        ScriptedSpeakerLlm::new(split_deltas(answer, 6)),
        ScriptedExecutiveLlm::interrupt_when("Lyon", "Paris is the capital of France"),
    );
    harness.seed_paris().await;

    let mut req = request(QUESTION);
    req.stream = false;
    let completion = harness.orchestrator.complete(req).await.unwrap();

    assert_eq!(completion.object, "chat.completion");
    let content = &completion.choices[0].message.content;
    assert!(content.starts_with(answer));
    assert!(content.contains("[Executive Interruption:"));
    assert!(content.contains("Paris"));
    assert_eq!(
        completion.choices[0].finish_reason.as_deref(),
        Some("stop")
    );
}

#[tokio::test]
async fn non_streaming_without_interruption_returns_plain_content() {
    let answer = "The capital of France is Paris.";
    let harness = harness::build(
        ScriptedSpeakerLlm::new(split_deltas(answer, 6)),
        ScriptedExecutiveLlm::always_none(),
    );

    let mut req = request(QUESTION);
    req.stream = false;
    let completion = harness.orchestrator.complete(req).await.unwrap();
    assert_eq!(completion.choices[0].message.content, answer);
}

#[tokio::test]
async fn client_disconnect_stops_writeback_side_effects() {
    use futures::StreamExt;

    // Slow speaker, slow executive: dropping the stream mid-flight must leave
    // the graph untouched by the superseded evaluations' writebacks
    let answer = "The capital of France is Paris, which has been the capital for centuries.";
    let harness = harness::build_with_stride(
        ScriptedSpeakerLlm::new(split_deltas(answer, 10)).with_delay(Duration::from_millis(20)),
        ScriptedExecutiveLlm::always_none().with_delay(Duration::from_millis(200)),
        10,
    );

    let mut stream = harness.orchestrator.stream_events(request(QUESTION));
    // Consume a few events, then disconnect
    let _ = stream.next().await;
    let _ = stream.next().await;
    let _ = stream.next().await;
    drop(stream);

    // T_cancel window: in-flight evaluations observe cancellation before any
    // graph mutation
    tokio::time::sleep(Duration::from_millis(500)).await;

    let exchanges: Vec<_> = harness
        .graph
        .nodes_of_kind(NodeKind::Knowledge)
        .into_iter()
        .filter(|n| n.name.starts_with("exchange-"))
        .collect();
    assert!(
        exchanges.is_empty(),
        "no writeback after client disconnect, found {exchanges:?}"
    );
}

#[tokio::test]
async fn completed_request_records_exchange_writeback() {
    let answer = "The capital of France is Paris.";
    let harness = harness::build(
        ScriptedSpeakerLlm::new(split_deltas(answer, 6)),
        ScriptedExecutiveLlm::always_none(),
    );
    harness.seed_paris().await;

    let events = harness.run_stream(request(QUESTION)).await;
    assert_stream_invariants(&events);

    // The final evaluation's writeback runs on a background task
    tokio::time::sleep(Duration::from_millis(200)).await;

    let topic = harness.graph.node_by_name(NodeKind::Topic, QUESTION);
    assert!(topic.is_some(), "topic created from the user query");
    let exchanges: Vec<_> = harness
        .graph
        .nodes_of_kind(NodeKind::Knowledge)
        .into_iter()
        .filter(|n| n.name.starts_with("exchange-"))
        .collect();
    assert!(!exchanges.is_empty(), "exchange knowledge node recorded");
    assert!(exchanges[0].description.contains(answer));
}

#[tokio::test]
async fn knowledge_context_is_spliced_before_last_user_message() {
    let harness = harness::build(
        ScriptedSpeakerLlm::new(split_deltas("Paris.", 2)),
        ScriptedExecutiveLlm::always_none(),
    );
    harness.seed_paris().await;

    // Query close enough to the seeded knowledge for prefetch to hit
    let events = harness
        .run_stream(request("capital of France"))
        .await;
    assert_stream_invariants(&events);

    let params = harness.speaker_llm.last_params().expect("speaker called");
    let roles: Vec<&str> = params.messages.iter().map(|m| m.role.as_str()).collect();
    assert_eq!(roles, vec!["system", "user"], "context inserted before the user message");
    assert!(params.messages[0]
        .content
        .contains("Paris is the capital of France"));
}
