//! HTTP transport for the tool protocol server (§4.9): `POST /mcp` carries
//! one JSON-RPC request per call, `GET /mcp` opens a long-lived SSE stream
//! held open with a heartbeat comment, `DELETE /mcp` retires a session.
//!
//! Protocol: JSON-RPC 2.0. Session ids are minted on `initialize` and
//! echoed back in the `mcp-session-id` response header; a client sending an
//! unknown id gets auto-registered (tolerant mode) rather than rejected.

use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use memgate_core::config::MCP_SSE_HEARTBEAT_SECS;
use memgate_core::GatewayError;
use memgate_tools::{call_tool, list_tools, ToolContext};
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use crate::app::AppState;

const SESSION_HEADER: &str = "mcp-session-id";
const PROTOCOL_VERSION: &str = "2025-06-18";

/// Body is read raw rather than through axum's `Json<Value>` extractor so a
/// malformed body can be turned into a JSON-RPC `-32700` envelope instead of
/// axum's bare non-JSON-RPC 400.
pub async fn mcp_post(State(state): State<Arc<AppState>>, headers: HeaderMap, raw_body: String) -> Response {
    let request: Value = match serde_json::from_str(&raw_body) {
        Ok(v) => v,
        Err(e) => {
            let err = GatewayError::RpcParse(e.to_string());
            return json_response(Uuid::new_v4().to_string(), rpc_error_from(Value::Null, &err));
        }
    };

    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let method = request.get("method").and_then(|v| v.as_str()).unwrap_or("");
    let is_notification = request.get("id").is_none();

    let incoming_session = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let session_id = match method {
        "initialize" => {
            let sid = Uuid::new_v4().to_string();
            state.mcp_sessions.insert(sid.clone(), Utc::now());
            sid
        }
        _ => match incoming_session {
            Some(sid) => {
                if !state.mcp_sessions.contains_key(&sid) {
                    warn!(session_id = sid, "unknown mcp session id, auto-registering");
                    state.mcp_sessions.insert(sid.clone(), Utc::now());
                }
                sid
            }
            None => Uuid::new_v4().to_string(),
        },
    };

    let body = match method {
        "initialize" => rpc_result(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": { "name": "memgate", "version": env!("CARGO_PKG_VERSION") },
            }),
        ),
        "notifications/initialized" => {
            if is_notification {
                return empty_response(session_id);
            }
            rpc_result(id, Value::Null)
        }
        "tools/list" => rpc_result(id, list_tools()),
        "tools/call" => {
            let params = request.get("params").cloned().unwrap_or(json!({}));
            let tool_name = params.get("name").and_then(|v| v.as_str()).unwrap_or("");
            let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

            let retrieval = state.retrieval();
            let ctx = ToolContext {
                store: &state.store,
                retrieval: &retrieval,
                maps: &state.maps,
                notes_http: &state.notes_http,
                notes_config: &state.config.notes,
            };
            rpc_result(id, call_tool(&ctx, tool_name, &arguments).await)
        }
        "ping" => rpc_result(id, json!({})),
        _ => {
            if is_notification {
                return empty_response(session_id);
            }
            let err = GatewayError::RpcMethodNotFound {
                method: method.to_string(),
            };
            rpc_error_from(id, &err)
        }
    };

    json_response(session_id, body)
}

/// SSE heartbeat stream (§5): one comment line every 25 s, no real events;
/// ends when the client disconnects.
pub async fn mcp_get(State(_state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let session_id = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let heartbeat = stream! {
        let mut interval = tokio::time::interval(Duration::from_secs(MCP_SSE_HEARTBEAT_SECS));
        loop {
            interval.tick().await;
            yield Ok::<_, std::io::Error>(axum::body::Bytes::from_static(b": heartbeat\n\n"));
        }
    };

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(axum::http::header::CONTENT_TYPE, "text/event-stream")
        .header(axum::http::header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(heartbeat))
        .unwrap();
    if let Ok(value) = HeaderValue::from_str(&session_id) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response.into_response()
}

pub async fn mcp_delete(State(state): State<Arc<AppState>>, headers: HeaderMap) -> impl IntoResponse {
    if let Some(sid) = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()) {
        state.mcp_sessions.remove(sid);
    }
    StatusCode::NO_CONTENT
}

fn rpc_result(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

/// Builds a JSON-RPC error body from a [`GatewayError`], sourcing the wire
/// code from [`GatewayError::rpc_code`] (§302). Only ever called with a
/// variant that actually has one.
fn rpc_error_from(id: Value, err: &GatewayError) -> Value {
    let code = err.rpc_code().unwrap_or(-32603);
    json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": err.to_string() } })
}

fn json_response(session_id: String, body: Value) -> Response {
    let mut response = (StatusCode::OK, Json(body)).into_response();
    if let Ok(value) = HeaderValue::from_str(&session_id) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}

fn empty_response(session_id: String) -> Response {
    let mut response = StatusCode::NO_CONTENT.into_response();
    if let Ok(value) = HeaderValue::from_str(&session_id) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_error_from_parse_error_uses_minus_32700() {
        let err = GatewayError::RpcParse("unexpected EOF".to_string());
        let body = rpc_error_from(Value::Null, &err);
        assert_eq!(body["error"]["code"], json!(-32700));
    }

    #[test]
    fn rpc_error_from_method_not_found_uses_minus_32601() {
        let err = GatewayError::RpcMethodNotFound {
            method: "bogus".to_string(),
        };
        let body = rpc_error_from(json!(1), &err);
        assert_eq!(body["error"]["code"], json!(-32601));
        assert_eq!(body["id"], json!(1));
    }
}
