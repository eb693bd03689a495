//! OpenAI-compatible `/v1/chat/completions` endpoint (§6). The request body
//! is passed through close to verbatim — only `model` is rewritten to the
//! resolved backend's upstream name and the system message gets an
//! auto-inject splice — so any client speaking the OpenAI chat API works
//! unmodified against whichever backend the model name resolves to.

use std::sync::{Arc, Mutex};

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures_util::StreamExt;
use memgate_inject::AutoInjectEngine;
use memgate_proxy::{decide_mode, ChatStream, RelayAccumulator, RelayMode};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::app::AppState;
use crate::capture::{self, CaptureJob};

const DEFAULT_USER_ID: &str = "dream";

pub async fn chat_completions(State(state): State<Arc<AppState>>, Json(mut body): Json<Value>) -> Response {
    let Some(model) = body.get("model").and_then(|v| v.as_str()).map(str::to_string) else {
        return error_response(StatusCode::BAD_REQUEST, "missing required field: model");
    };
    // A missing or unextractable user message degrades memory capture, not
    // the relay itself — the request still goes upstream unmodified (§4.1).
    let user_msg = last_user_message(&body);
    let stream_requested = body.get("stream").and_then(|v| v.as_bool()).unwrap_or(false);
    // The model name doubles as the channel boundary (§3): memory, rounds,
    // and scene state stay isolated per upstream model family.
    let channel = model.clone();

    let backend = match memgate_proxy::resolve(&state.config, &model) {
        Ok(b) => b,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };

    info!(model, channel, stream = stream_requested, "chat completions request");

    let retrieval = state.retrieval();
    if let Some(user_msg) = &user_msg {
        if let Some(memory_text) = state
            .auto_inject
            .process(&state.store, &retrieval, DEFAULT_USER_ID, &channel, user_msg)
            .await
        {
            splice_system_prompt(&mut body, &AutoInjectEngine::render_inject_block(&memory_text));
        }
    }

    let mode = decide_mode(stream_requested, &backend);

    match mode {
        RelayMode::NonStreaming => {
            let result = match state.relay.send_non_streaming(&backend, body).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "non-streaming relay failed");
                    return error_response(StatusCode::BAD_GATEWAY, &e.to_string());
                }
            };
            if let Some(user_msg) = &user_msg {
                spawn_capture(&state, &channel, user_msg, &result.accumulator);
            }
            (StatusCode::OK, Json(result.raw)).into_response()
        }
        RelayMode::Streaming => {
            let accumulator = Arc::new(Mutex::new(RelayAccumulator::default()));
            match state.relay.send_streaming(backend, body, accumulator.clone()) {
                Ok(chat_stream) => {
                    let state = state.clone();
                    let channel = channel.clone();
                    sse_response(chat_stream, move || {
                        if let Some(user_msg) = &user_msg {
                            let acc = accumulator.lock().unwrap().clone();
                            spawn_capture(&state, &channel, user_msg, &acc);
                        }
                    })
                }
                Err(e) => {
                    warn!(error = %e, "streaming relay failed to start");
                    error_response(StatusCode::BAD_GATEWAY, &e.to_string())
                }
            }
        }
        RelayMode::FakeStream => match state.relay.send_fake_streaming(&backend, body).await {
            Ok((chat_stream, acc)) => {
                if let Some(user_msg) = &user_msg {
                    spawn_capture(&state, &channel, user_msg, &acc);
                }
                sse_response(chat_stream, || {})
            }
            Err(e) => {
                warn!(error = %e, "fake-stream relay failed");
                error_response(StatusCode::BAD_GATEWAY, &e.to_string())
            }
        },
    }
}

fn spawn_capture(state: &Arc<AppState>, channel: &str, user_msg: &str, acc: &RelayAccumulator) {
    let scene = state.auto_inject.current_scene(channel);
    capture::spawn(
        state.clone(),
        CaptureJob {
            user_id: DEFAULT_USER_ID.to_string(),
            channel: channel.to_string(),
            scene,
            user_msg: user_msg.to_string(),
            assistant_msg: acc.content.clone(),
            citation_ids: acc.citation_ids.clone(),
        },
    );
}

fn last_user_message(body: &Value) -> Option<String> {
    body.get("messages")?
        .as_array()?
        .iter()
        .rev()
        .find(|m| m.get("role").and_then(|r| r.as_str()) == Some("user"))
        .and_then(|m| m.get("content"))
        .and_then(extract_text_content)
}

/// OpenAI `content` is either a plain string or a multi-part array; in the
/// array form only `{"type":"text","text":...}` parts carry text, and they
/// are concatenated in order (§4.1).
fn extract_text_content(content: &Value) -> Option<String> {
    if let Some(s) = content.as_str() {
        return Some(s.to_string());
    }
    let parts = content.as_array()?;
    let text: String = parts
        .iter()
        .filter(|p| p.get("type").and_then(|t| t.as_str()) == Some("text"))
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();
    (!text.is_empty()).then_some(text)
}

/// Appends the inject block to an existing system message, or inserts a
/// fresh one at the front of `messages` if none exists.
fn splice_system_prompt(body: &mut Value, block: &str) {
    let Some(messages) = body.get_mut("messages").and_then(|m| m.as_array_mut()) else {
        return;
    };
    if let Some(system_msg) = messages
        .iter_mut()
        .find(|m| m.get("role").and_then(|r| r.as_str()) == Some("system"))
    {
        let existing = system_msg.get("content").and_then(|c| c.as_str()).unwrap_or("").to_string();
        system_msg["content"] = json!(format!("{existing}{block}"));
    } else {
        messages.insert(0, json!({ "role": "system", "content": block }));
    }
}

/// Wraps a proxy chat stream as an SSE HTTP response, running `on_complete`
/// once the upstream stream is fully drained — this is where the captured
/// turn gets spawned, after the client has already seen every chunk.
fn sse_response(stream: ChatStream, on_complete: impl FnOnce() + Send + 'static) -> Response {
    let wrapped = async_stream::stream! {
        futures_util::pin_mut!(stream);
        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) => yield Ok::<_, std::io::Error>(axum::body::Bytes::from(chunk)),
                Err(e) => {
                    warn!(error = %e, "relay stream error, closing early");
                    break;
                }
            }
        }
        on_complete();
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(wrapped))
        .unwrap()
        .into_response()
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(json!({ "error": { "message": message, "type": "invalid_request_error" } })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_user_message_reads_plain_string_content() {
        let body = json!({
            "messages": [
                {"role": "system", "content": "be nice"},
                {"role": "user", "content": "hello there"},
            ]
        });
        assert_eq!(last_user_message(&body), Some("hello there".to_string()));
    }

    #[test]
    fn last_user_message_concatenates_multipart_text_content() {
        let body = json!({
            "messages": [
                {"role": "user", "content": [
                    {"type": "text", "text": "part one "},
                    {"type": "image_url", "image_url": {"url": "http://example.com/a.png"}},
                    {"type": "text", "text": "part two"},
                ]},
            ]
        });
        assert_eq!(last_user_message(&body), Some("part one part two".to_string()));
    }

    #[test]
    fn last_user_message_is_none_when_multipart_has_no_text() {
        let body = json!({
            "messages": [
                {"role": "user", "content": [
                    {"type": "image_url", "image_url": {"url": "http://example.com/a.png"}},
                ]},
            ]
        });
        assert_eq!(last_user_message(&body), None);
    }

    #[test]
    fn last_user_message_is_none_without_messages() {
        assert_eq!(last_user_message(&json!({})), None);
    }
}
