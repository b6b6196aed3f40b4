//! POST /v1/embeddings
//!
//! Thin surface over the embedding provider. Accepts a single string or a
//! list of strings; usage counts are whitespace estimates.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use tandem_core::{estimate_tokens, EmbeddingProvider as _};

use crate::error::ApiError;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct WireEmbeddingsRequest {
    #[serde(default)]
    pub model: Option<String>,
    pub input: Value,
}

fn collect_inputs(input: &Value) -> Result<Vec<String>, ApiError> {
    match input {
        Value::String(text) => Ok(vec![text.clone()]),
        Value::Array(items) => {
            let texts: Option<Vec<String>> = items
                .iter()
                .map(|item| item.as_str().map(|s| s.to_string()))
                .collect();
            texts.ok_or_else(|| {
                ApiError::invalid_request(
                    "input array must contain only strings",
                    Some("input"),
                    "invalid_input",
                )
            })
        }
        _ => Err(ApiError::invalid_request(
            "input must be a string or an array of strings",
            Some("input"),
            "invalid_input",
        )),
    }
}

pub async fn embeddings(
    State(state): State<Arc<AppState>>,
    Json(body): Json<WireEmbeddingsRequest>,
) -> Result<Json<Value>, ApiError> {
    let inputs = collect_inputs(&body.input)?;
    if inputs.is_empty() {
        return Err(ApiError::invalid_request(
            "input cannot be empty",
            Some("input"),
            "invalid_input",
        ));
    }

    let mut data = Vec::with_capacity(inputs.len());
    let mut prompt_tokens = 0u32;
    for (index, text) in inputs.iter().enumerate() {
        let embedding = state
            .embedder
            .embed(text)
            .map_err(|e| ApiError::internal(e.to_string()))?;
        prompt_tokens += estimate_tokens(text);
        data.push(json!({
            "object": "embedding",
            "embedding": embedding.vector,
            "index": index,
        }));
    }

    let model = body
        .model
        .unwrap_or_else(|| state.config.embedding_model.clone());
    Ok(Json(json!({
        "object": "list",
        "data": data,
        "model": model,
        "usage": {
            "prompt_tokens": prompt_tokens,
            "total_tokens": prompt_tokens,
        }
    })))
}
