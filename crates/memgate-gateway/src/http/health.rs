use std::sync::Arc;

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::app::AppState;

/// GET /health — liveness probe (§6): reports process version and the
/// configured upstream model surface.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let supported_models: Vec<&str> = state
        .config
        .providers
        .backends
        .keys()
        .map(String::as_str)
        .collect();

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "supported_models": supported_models,
        "mcp_sessions": state.mcp_sessions.len(),
    }))
}
