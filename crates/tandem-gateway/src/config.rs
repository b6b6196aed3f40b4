//! Environment configuration
//!
//! All tunables come from the process environment (optionally seeded from a
//! `.env` file by `main`). Empty values are treated as unset.

use std::time::Duration;

use tandem_core::{DEFAULT_EMBEDDING_DIMENSION, DEFAULT_EMBEDDING_MODEL, DEFAULT_REEVAL_STRIDE};

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_nonempty(key).and_then(|s| s.parse::<T>().ok())
}

/// Everything the gateway reads from the environment
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,

    pub speaker_model: String,
    pub executive_model: String,

    pub embedding_model: String,
    pub embedding_dimension: usize,

    pub neo4j_url: String,
    pub neo4j_user: String,
    pub neo4j_password: String,

    /// Upstream LLM bearer key
    pub default_api_key: Option<String>,
    /// OpenAI-compatible upstream base URL
    pub llm_base_url: String,

    pub reeval_stride: usize,
    pub request_timeout: Duration,

    /// Enables /debug/query and frame-level debug logging
    pub debug: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            speaker_model: "openai/gpt-4o-mini".to_string(),
            executive_model: "openai/gpt-4o-mini".to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
            neo4j_url: "bolt://localhost:7687".to_string(),
            neo4j_user: "neo4j".to_string(),
            neo4j_password: "password".to_string(),
            default_api_key: None,
            llm_base_url: "https://openrouter.ai/api/v1".to_string(),
            reeval_stride: DEFAULT_REEVAL_STRIDE,
            request_timeout: Duration::from_secs(120),
            debug: false,
        }
    }
}

impl GatewayConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: env_nonempty("HOST").unwrap_or(defaults.host),
            port: env_parsed("PORT").unwrap_or(defaults.port),
            speaker_model: env_nonempty("SPEAKER_MODEL").unwrap_or(defaults.speaker_model),
            executive_model: env_nonempty("EXECUTIVE_MODEL").unwrap_or(defaults.executive_model),
            embedding_model: env_nonempty("EMBEDDING_MODEL").unwrap_or(defaults.embedding_model),
            embedding_dimension: env_parsed("EMBEDDING_DIMENSION")
                .unwrap_or(defaults.embedding_dimension),
            neo4j_url: env_nonempty("NEO4J_URL").unwrap_or(defaults.neo4j_url),
            neo4j_user: env_nonempty("NEO4J_USER").unwrap_or(defaults.neo4j_user),
            neo4j_password: env_nonempty("NEO4J_PASSWORD").unwrap_or(defaults.neo4j_password),
            default_api_key: env_nonempty("DEFAULT_API_KEY"),
            llm_base_url: env_nonempty("LLM_BASE_URL").unwrap_or(defaults.llm_base_url),
            reeval_stride: env_parsed("REEVAL_STRIDE").unwrap_or(defaults.reeval_stride),
            request_timeout: env_parsed::<u64>("REQUEST_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            debug: env_nonempty("DEBUG")
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(defaults.debug),
        }
    }
}
