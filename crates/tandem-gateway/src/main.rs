//! Tandem Gateway - OpenAI-compatible chat completions over dual LLM workers
//!
//! Presents `/v1/chat/completions` while internally orchestrating a
//! user-facing Speaker and a background Executive over a Neo4j knowledge
//! graph with vector search.
//!
//! Surfaces:
//! - POST /v1/chat/completions (streaming SSE and one-shot JSON)
//! - POST /v1/embeddings
//! - POST /debug/query (when DEBUG=true)

mod config;
mod error;
mod routes;
mod server;

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tandem_core::{
    ChatBackend, EmbeddingProvider, Executive, GraphStore, KnowledgeTools, LocalEmbedder,
    Neo4jStore, OpenAiBackend, Orchestrator, OrchestratorConfig, Speaker,
};

use crate::config::GatewayConfig;
use crate::server::{build_router, shutdown_signal, AppState};

/// Handle `--help`/`--version`; everything else is configured via env
fn parse_args() {
    let args: Vec<String> = std::env::args().collect();
    for arg in &args[1..] {
        match arg.as_str() {
            "--help" | "-h" => {
                println!("Tandem Gateway v{}", env!("CARGO_PKG_VERSION"));
                println!();
                println!("OpenAI-compatible gateway over dual LLM workers and a knowledge graph.");
                println!();
                println!("USAGE:");
                println!("    tandem-gateway");
                println!();
                println!("ENVIRONMENT:");
                println!("    SPEAKER_MODEL           Speaker LLM identifier");
                println!("    EXECUTIVE_MODEL         Executive LLM identifier");
                println!("    EMBEDDING_MODEL         Embedding model name");
                println!("    EMBEDDING_DIMENSION     Embedding dimension D");
                println!("    NEO4J_URL               Bolt URL (default bolt://localhost:7687)");
                println!("    NEO4J_USER              Graph user");
                println!("    NEO4J_PASSWORD          Graph password");
                println!("    DEFAULT_API_KEY         Upstream LLM bearer key");
                println!("    LLM_BASE_URL            OpenAI-compatible upstream base URL");
                println!("    REEVAL_STRIDE           Executive re-evaluation stride (chars)");
                println!("    REQUEST_TIMEOUT_SECS    Per-request wall clock bound");
                println!("    HOST / PORT             Bind address (default 0.0.0.0:3000)");
                println!("    DEBUG                   Enable /debug/query and frame logging");
                println!("    RUST_LOG                Log level filter");
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("tandem-gateway {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            arg => {
                eprintln!("error: unknown argument '{}'", arg);
                eprintln!("Try 'tandem-gateway --help' for more information.");
                std::process::exit(1);
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    parse_args();

    // .env is optional; real deployments set the environment directly
    let _ = dotenvy::dotenv();

    let config = GatewayConfig::from_env();

    let default_filter = if config.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    info!("Tandem Gateway v{} starting", env!("CARGO_PKG_VERSION"));
    info!(
        "speaker={} executive={} embedding={}({}d)",
        config.speaker_model,
        config.executive_model,
        config.embedding_model,
        config.embedding_dimension
    );

    // Graph store
    let store = Neo4jStore::connect(
        &config.neo4j_url,
        &config.neo4j_user,
        &config.neo4j_password,
        config.embedding_dimension,
    )
    .await?;
    store.schema_init().await?;
    info!("connected to graph store at {}", config.neo4j_url);
    let store: Arc<dyn GraphStore> = Arc::new(store);

    // Embedding provider (lazy; warm it up front so the first request
    // doesn't pay the model download)
    let embedder = Arc::new(LocalEmbedder::new(
        config.embedding_model.clone(),
        config.embedding_dimension,
    ));
    if let Err(e) = embedder.warm() {
        warn!("embedding model unavailable, nodes will be created without embeddings: {e}");
    }
    let embedder: Arc<dyn EmbeddingProvider> = embedder;

    // Knowledge tools
    let tools = Arc::new(KnowledgeTools::new(store, embedder.clone()));

    // Workers over the upstream LLM
    let llm: Arc<dyn ChatBackend> = Arc::new(OpenAiBackend::new(
        config.llm_base_url.clone(),
        config.default_api_key.clone(),
    ));
    let speaker = Arc::new(Speaker::new(llm.clone(), config.speaker_model.clone()));
    let executive = Arc::new(Executive::new(
        tools.clone(),
        llm.clone(),
        config.executive_model.clone(),
    ));

    let orchestrator = Arc::new(Orchestrator::new(
        tools.clone(),
        speaker,
        executive,
        OrchestratorConfig {
            reeval_stride: config.reeval_stride,
            request_timeout: config.request_timeout,
        },
    ));

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let state = Arc::new(AppState {
        config,
        tools,
        orchestrator,
        embedder,
        executive_llm: llm,
    });
    let app = build_router(state);

    info!("listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("gateway shut down");
    Ok(())
}
