//! Worker behavior tests
//!
//! The Executive's retrieval protocol, verdict degradation, and writeback,
//! plus the Speaker's context augmentation, over the mocks.

use std::collections::BTreeMap;
use std::sync::Arc;

use tandem_core::{
    ChatMessage, EvalAction, Executive, KnowledgeTools, NodeKind, NodeRef,
};

use tandem_e2e_tests::harness::build_tools;
use tandem_e2e_tests::mocks::{MemoryGraph, ScriptedExecutiveLlm};

fn executive_over(
    tools: Arc<KnowledgeTools>,
    llm: ScriptedExecutiveLlm,
) -> Executive {
    Executive::new(tools, Arc::new(llm), "executive-test")
}

async fn seed_quantum(tools: &KnowledgeTools) {
    tools
        .create_node(
            NodeKind::Topic,
            "Quantum Computing",
            "Computation with quantum effects",
            None,
            Vec::new(),
            BTreeMap::new(),
        )
        .await
        .unwrap();
    for (name, description) in [
        ("Qubits", "two-state quantum systems"),
        ("Entanglement", "correlated quantum states"),
    ] {
        tools
            .create_node(
                NodeKind::Knowledge,
                name,
                description,
                Some(description.to_string()),
                vec![NodeRef::new(NodeKind::Topic, "Quantum Computing")],
                BTreeMap::new(),
            )
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn retrieval_expands_topics_through_hybrid_search() {
    let (_graph, tools) = build_tools();
    seed_quantum(&tools).await;
    let executive = executive_over(tools, ScriptedExecutiveLlm::always_none());

    let doc = executive.retrieve("quantum computing basics").await;

    assert!(!doc.topics.is_empty(), "topic matched");
    assert_eq!(doc.topics[0].name, "Quantum Computing");
    let item_names: Vec<&str> = doc.items.iter().map(|i| i.name.as_str()).collect();
    assert!(item_names.contains(&"Qubits"));
    assert!(item_names.contains(&"Entanglement"));
    assert!(doc.text.contains("Qubits"));
}

#[tokio::test]
async fn retrieval_falls_back_to_knowledge_when_no_topic_matches() {
    let (_graph, tools) = build_tools();
    // Knowledge only, no Topic anywhere near the query
    tools
        .create_node(
            NodeKind::Knowledge,
            "Photosynthesis",
            "plants convert light to energy",
            Some("photosynthesis".to_string()),
            Vec::new(),
            BTreeMap::new(),
        )
        .await
        .unwrap();
    let executive = executive_over(tools, ScriptedExecutiveLlm::always_none());

    let doc = executive.retrieve("photosynthesis in plants").await;

    assert!(doc.topics.is_empty());
    assert_eq!(doc.items.len(), 1);
    assert_eq!(doc.items[0].name, "Photosynthesis");
}

#[tokio::test]
async fn retrieval_on_empty_graph_is_empty_not_fatal() {
    let (_graph, tools) = build_tools();
    let executive = executive_over(tools, ScriptedExecutiveLlm::always_none());
    let doc = executive.retrieve("anything at all").await;
    assert!(doc.is_empty());
}

#[tokio::test]
async fn unparseable_model_output_degrades_to_none() {
    let (_graph, tools) = build_tools();
    let executive = executive_over(
        tools,
        ScriptedExecutiveLlm::new(|_| "I think the answer looks fine to me!".to_string()),
    );

    let verdict = executive
        .evaluate("query", &[ChatMessage::user("query")], "partial output")
        .await;

    assert_eq!(verdict.action, EvalAction::None);
    assert_eq!(verdict.reason, "parse failure");
}

#[tokio::test]
async fn fenced_verdict_json_is_accepted() {
    let (_graph, tools) = build_tools();
    let executive = executive_over(
        tools,
        ScriptedExecutiveLlm::new(|_| {
            "```json\n{\"action\": \"interrupt\", \"reason\": \"wrong\", \"document\": \"correction\"}\n```"
                .to_string()
        }),
    );

    let verdict = executive
        .evaluate("query", &[ChatMessage::user("query")], "wrong output")
        .await;

    assert_eq!(verdict.action, EvalAction::Interrupt);
    assert_eq!(verdict.document, "correction");
}

#[tokio::test]
async fn writeback_creates_topic_and_fresh_exchange_nodes() {
    let (graph, tools) = build_tools();
    let executive = executive_over(tools, ScriptedExecutiveLlm::always_none());

    executive
        .record_exchange("What is a qubit?", "A qubit is a two-state quantum system.")
        .await
        .unwrap();
    executive
        .record_exchange("What is a qubit?", "It is the quantum analogue of a bit.")
        .await
        .unwrap();

    // Topic deduplicated by exact name
    let topics: Vec<_> = graph
        .nodes_of_kind(NodeKind::Topic)
        .into_iter()
        .filter(|n| n.name == "What is a qubit?")
        .collect();
    assert_eq!(topics.len(), 1);

    // Every exchange creates a fresh Knowledge node
    let exchanges: Vec<_> = graph
        .nodes_of_kind(NodeKind::Knowledge)
        .into_iter()
        .filter(|n| n.name.starts_with("exchange-"))
        .collect();
    assert_eq!(exchanges.len(), 2);
    for exchange in &exchanges {
        assert!(exchange.summary.is_some(), "exchange nodes carry a summary");
        assert!(exchange.description.starts_with("user: What is a qubit?"));
    }

    // Both linked BELONGS_TO the topic
    let topic_id = topics[0].id;
    assert_eq!(graph.edges_touching(topic_id).len(), 2);
}

#[tokio::test]
async fn writeback_surfaces_backend_errors_to_the_caller() {
    // A zero-dimension store makes every embedding write fail dimension
    // checks further down; writeback must return the error, not panic
    let graph = Arc::new(MemoryGraph::new(64));
    let embedder: Arc<dyn tandem_core::EmbeddingProvider> =
        Arc::new(tandem_e2e_tests::mocks::DeterministicEmbedder::new(32));
    let store: Arc<dyn tandem_core::GraphStore> = graph.clone();
    let tools = Arc::new(KnowledgeTools::new(store, embedder));
    let executive = executive_over(tools, ScriptedExecutiveLlm::always_none());

    // 32-dim embeddings against a 64-dim store: node creation proceeds only
    // if the embedding is dropped; here the store rejects the vector, so the
    // error propagates
    let result = executive.record_exchange("q", "a").await;
    assert!(result.is_err());
}
