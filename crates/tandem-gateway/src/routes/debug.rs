//! POST /debug/query
//!
//! Debug sub-surface, only mounted when `DEBUG=true`. When `tool_params` is
//! present, one knowledge tool is inferred from the request shape and
//! dispatched directly; otherwise the query is delegated to the Executive's
//! LLM.
//!
//! Inference priority:
//! 1. explicit `knowledge_*` tool mention in the query text
//! 2. `query` present            → knowledge_raw_query
//! 3. `nodeType` + `text` + `relationshipType` + `targetType`
//!                                → knowledge_hybrid_search
//! 4. `nodeType` + `text`        → knowledge_vector_search
//! 5. `nodeType` (with `belongsTo` or alone)
//!                                → knowledge_create_node

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use tandem_core::{ChatBackend as _, ChatMessage, ChatParams, ToolCall};

use crate::error::ApiError;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct DebugQueryRequest {
    pub query: String,
    #[serde(default)]
    pub tool_params: Option<Value>,
}

/// Infer the tool name from the query text and parameter shape
pub fn infer_tool(query: &str, params: &Map<String, Value>) -> Option<&'static str> {
    for name in ToolCall::NAMES {
        if query.contains(name) {
            return Some(name);
        }
    }
    if params.contains_key("query") {
        return Some("knowledge_raw_query");
    }
    let has = |key: &str| params.contains_key(key);
    if has("nodeType") && has("text") && has("relationshipType") && has("targetType") {
        return Some("knowledge_hybrid_search");
    }
    if has("nodeType") && has("text") {
        return Some("knowledge_vector_search");
    }
    if has("nodeType") {
        return Some("knowledge_create_node");
    }
    None
}

pub async fn debug_query(
    State(state): State<Arc<AppState>>,
    Json(body): Json<DebugQueryRequest>,
) -> Result<Json<Value>, ApiError> {
    if let Some(tool_params) = &body.tool_params {
        let params = tool_params.as_object().cloned().ok_or_else(|| {
            ApiError::invalid_request(
                "tool_params must be an object",
                Some("tool_params"),
                "invalid_tool_params",
            )
        })?;

        let tool = infer_tool(&body.query, &params).ok_or_else(|| {
            ApiError::invalid_request(
                "could not infer a knowledge tool from tool_params",
                Some("tool_params"),
                "unknown_tool",
            )
        })?;

        let mut tagged = params;
        tagged.insert("tool".to_string(), json!(tool));
        let call: ToolCall = serde_json::from_value(Value::Object(tagged)).map_err(|e| {
            ApiError::invalid_request(
                format!("invalid arguments for {tool}: {e}"),
                Some("tool_params"),
                "invalid_tool_params",
            )
        })?;

        let result = state
            .tools
            .dispatch(call)
            .await
            .map_err(|e| ApiError::internal(e.to_string()))?;
        return Ok(Json(json!({"tool": tool, "result": result})));
    }

    // No tool parameters: hand the query to the Executive's LLM
    let response = state
        .executive_llm
        .complete(ChatParams {
            model: state.config.executive_model.clone(),
            messages: vec![ChatMessage::user(body.query)],
            ..Default::default()
        })
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;

    Ok(Json(json!({"response": response})))
}
