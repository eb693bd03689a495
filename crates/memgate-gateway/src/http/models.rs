use std::sync::Arc;

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::app::AppState;

/// GET /models — lists the canonical backends and the aliases that
/// resolve to them (§6). Not part of the OpenAI API surface proper, but a
/// natural companion to it for clients picking a `model` value.
pub async fn models_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let providers = &state.config.providers;

    let data: Vec<Value> = providers
        .backends
        .keys()
        .map(|canonical| {
            let aliases: Vec<&str> = providers
                .aliases
                .iter()
                .filter(|(_, target)| *target == canonical)
                .map(|(alias, _)| alias.as_str())
                .collect();
            json!({
                "id": canonical,
                "object": "model",
                "aliases": aliases,
            })
        })
        .collect();

    Json(json!({ "object": "list", "data": data }))
}
