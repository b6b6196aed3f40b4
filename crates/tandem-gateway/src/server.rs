//! Router & shared state

use std::sync::Arc;

use axum::routing::post;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use tandem_core::{ChatBackend, EmbeddingProvider, KnowledgeTools, Orchestrator};

use crate::config::GatewayConfig;
use crate::routes;

/// Shared application state
pub struct AppState {
    pub config: GatewayConfig,
    pub tools: Arc<KnowledgeTools>,
    pub orchestrator: Arc<Orchestrator>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    /// The Executive's LLM, reused by the debug surface's delegate path
    pub executive_llm: Arc<dyn ChatBackend>,
}

/// Build the router. The debug sub-surface is only mounted when `DEBUG=true`.
pub fn build_router(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route("/v1/chat/completions", post(routes::chat::chat_completions))
        .route("/v1/embeddings", post(routes::embeddings::embeddings));

    if state.config.debug {
        router = router.route("/debug/query", post(routes::debug::debug_query));
    }

    router
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Resolve on ctrl-c so axum can drain connections before exit
pub async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
