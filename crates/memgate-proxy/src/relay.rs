use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_stream::try_stream;
use futures_util::{Stream, StreamExt};
use serde_json::{json, Value};

use crate::backend::ResolvedBackend;
use crate::citation::strip_citations;
use crate::error::{ProxyError, Result};
use crate::stream::SseLineBuffer;

/// Characters released per synthetic SSE chunk when re-serializing a
/// non-streaming response for a fake-stream backend. Cosmetic tuning, not
/// a protocol requirement — safe to retune.
const FAKE_STREAM_CHUNK_CHARS: usize = 4;
/// Cooperative pause between synthetic chunks, to approximate the cadence
/// a real token-by-token stream would have. Cosmetic tuning.
const FAKE_STREAM_YIELD_MS: u64 = 20;

pub type SseChunk = String;
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<SseChunk>> + Send>>;

/// Whether the client asked for SSE and whether the resolved backend can
/// actually provide it determines which of the three relay modes applies
/// (§4.1): a backend flagged `fake_stream` never gets a real streaming
/// request, regardless of what the client asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayMode {
    Streaming,
    NonStreaming,
    FakeStream,
}

pub fn decide_mode(client_wants_stream: bool, backend: &ResolvedBackend) -> RelayMode {
    match (client_wants_stream, backend.fake_stream) {
        (true, true) => RelayMode::FakeStream,
        (true, false) => RelayMode::Streaming,
        (false, _) => RelayMode::NonStreaming,
    }
}

/// Running totals extracted from a relay, used by the caller to persist a
/// captured turn and bump citation weights once the response completes.
#[derive(Debug, Default, Clone)]
pub struct RelayAccumulator {
    pub content: String,
    pub reasoning_content: String,
    pub citation_ids: Vec<String>,
    /// Verbatim `message.tool_calls` from the upstream response, when
    /// present and non-empty. Drives the tool-call branch of the
    /// synthetic-streaming re-serialization (§4.1).
    pub tool_calls: Option<Vec<Value>>,
}

pub struct NonStreamingResult {
    pub raw: Value,
    pub accumulator: RelayAccumulator,
}

#[derive(Clone)]
pub struct RelayClient {
    http: reqwest::Client,
}

impl Default for RelayClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    fn request(&self, backend: &ResolvedBackend, body: &Value) -> reqwest::RequestBuilder {
        let url = format!("{}/chat/completions", backend.base_url.trim_end_matches('/'));
        let mut req = self
            .http
            .post(url)
            .timeout(Duration::from_secs(backend.timeout_secs))
            .bearer_auth(&backend.api_key)
            .json(body);
        for (k, v) in &backend.extra_headers {
            req = req.header(k, v);
        }
        req
    }

    /// Relay mode 2: a single non-streaming upstream call. The response's
    /// `choices[0].message.content` has citation markers stripped before
    /// being handed back to the caller for either direct passthrough or
    /// synthetic re-streaming.
    pub async fn send_non_streaming(
        &self,
        backend: &ResolvedBackend,
        mut body: Value,
    ) -> Result<NonStreamingResult> {
        body["model"] = json!(backend.upstream_model);
        body["stream"] = json!(false);

        let response = self.request(backend, &body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProxyError::UpstreamStatus {
                status: status.as_u16(),
                body: text,
            });
        }
        let mut raw: Value = response.json().await?;

        let message = raw
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .cloned()
            .unwrap_or(Value::Null);

        let raw_content = message
            .get("content")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let reasoning_content = message
            .get("reasoning_content")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let (content, citation_ids) = strip_citations(raw_content);
        let tool_calls = message
            .get("tool_calls")
            .and_then(|v| v.as_array())
            .filter(|arr| !arr.is_empty())
            .cloned();

        if let Some(choice0) = raw
            .get_mut("choices")
            .and_then(|c| c.get_mut(0))
            .and_then(|c| c.get_mut("message"))
        {
            choice0["content"] = json!(content);
        }

        Ok(NonStreamingResult {
            raw,
            accumulator: RelayAccumulator {
                content,
                reasoning_content,
                citation_ids,
                tool_calls,
            },
        })
    }

    /// Relay mode 1: true SSE passthrough. Raw bytes are forwarded to the
    /// client essentially unmodified; the only rewrite is stripping
    /// citation markers from each chunk's `delta.content`, since a marker
    /// split across a chunk boundary would otherwise leak a fragment to
    /// the user. The returned accumulator fills in as chunks are polled
    /// and is only complete once the stream is fully drained.
    pub fn send_streaming(
        &self,
        backend: ResolvedBackend,
        mut body: Value,
        accumulator: Arc<Mutex<RelayAccumulator>>,
    ) -> Result<ChatStream> {
        body["model"] = json!(backend.upstream_model);
        body["stream"] = json!(true);

        let req = self.request(&backend, &body);

        let stream = try_stream! {
            let response = req.send().await.map_err(ProxyError::Transport)?;
            let status = response.status();
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                Err(ProxyError::UpstreamStatus { status: status.as_u16(), body: text })?;
            }

            let mut bytes_stream = response.bytes_stream();
            let mut line_buf = SseLineBuffer::default();

            while let Some(chunk) = bytes_stream.next().await {
                let chunk = chunk.map_err(ProxyError::Transport)?;
                let text = String::from_utf8_lossy(&chunk).into_owned();
                for line in line_buf.feed(&text) {
                    if let Some(rewritten) = rewrite_sse_line(&line, &accumulator) {
                        yield rewritten;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    /// Relay mode 3: one non-streaming call, re-serialized as synthetic
    /// SSE chunks so the client sees a normal-looking stream even though
    /// the backend has no real one.
    pub async fn send_fake_streaming(
        &self,
        backend: &ResolvedBackend,
        body: Value,
    ) -> Result<(ChatStream, RelayAccumulator)> {
        let non_streaming = self.send_non_streaming(backend, body).await?;
        let accumulator = non_streaming.accumulator.clone();
        let model = backend.upstream_model.clone();
        let chunks = build_fake_stream_chunks(&model, &accumulator);

        let stream = try_stream! {
            for chunk in chunks {
                yield chunk;
                tokio::time::sleep(Duration::from_millis(FAKE_STREAM_YIELD_MS)).await;
            }
        };
        Ok((Box::pin(stream), accumulator))
    }
}

/// Parses one SSE `data:` line as a chat-completion chunk, strips citation
/// markers from its `delta.content`, and re-serializes it. Non-`data`
/// lines and the `[DONE]` sentinel pass through unmodified. Absorbs the
/// (possibly rewritten) delta into `accumulator`.
fn rewrite_sse_line(line: &str, accumulator: &Arc<Mutex<RelayAccumulator>>) -> Option<SseChunk> {
    if line.trim().is_empty() {
        return None;
    }
    let Some(data) = line.strip_prefix("data: ") else {
        return Some(format!("{line}\n\n"));
    };
    if data == "[DONE]" {
        return Some("data: [DONE]\n\n".to_string());
    }
    let Ok(mut value) = serde_json::from_str::<Value>(data) else {
        return Some(format!("{line}\n\n"));
    };

    if let Some(delta) = value
        .get_mut("choices")
        .and_then(|c| c.get_mut(0))
        .and_then(|c| c.get_mut("delta"))
    {
        if let Some(raw) = delta.get("content").and_then(|v| v.as_str()) {
            let (clean, ids) = strip_citations(raw);
            let mut guard = accumulator.lock().unwrap();
            guard.content.push_str(&clean);
            guard.citation_ids.extend(ids);
            drop(guard);
            delta["content"] = json!(clean);
        }
        if let Some(r) = delta.get("reasoning_content").and_then(|v| v.as_str()) {
            accumulator.lock().unwrap().reasoning_content.push_str(r);
        }
    }

    Some(format!("data: {value}\n\n"))
}

/// Re-serializes an already-complete response as the synthetic SSE chunk
/// sequence (§4.1). Two branches: `Start -> ToolCall+ -> Done` when the
/// upstream response carried `tool_calls`, otherwise `Start -> Content* ->
/// Done`.
fn build_fake_stream_chunks(model: &str, accumulator: &RelayAccumulator) -> Vec<String> {
    let id = format!("chatcmpl-fake-{}", uuid::Uuid::new_v4());
    let created = 0u64; // stamped by the caller if it needs wall-clock time
    let mut chunks = Vec::new();

    if let Some(tool_calls) = accumulator.tool_calls.as_ref().filter(|tc| !tc.is_empty()) {
        if !accumulator.reasoning_content.is_empty() {
            for slice in char_slices(&accumulator.reasoning_content, FAKE_STREAM_CHUNK_CHARS) {
                chunks.push(sse_chunk(
                    &id,
                    created,
                    model,
                    json!({"reasoning_content": slice}),
                    None,
                ));
            }
        }

        for (index, call) in tool_calls.iter().enumerate() {
            let call_id = call.get("id").and_then(|v| v.as_str()).unwrap_or_default();
            let name = call
                .get("function")
                .and_then(|f| f.get("name"))
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            let arguments = call
                .get("function")
                .and_then(|f| f.get("arguments"))
                .and_then(|v| v.as_str())
                .unwrap_or_default();

            let mut header = json!({
                "tool_calls": [{
                    "index": index,
                    "id": call_id,
                    "type": "function",
                    "function": {"name": name, "arguments": ""},
                }],
            });
            if index == 0 {
                header["role"] = json!("assistant");
                header["content"] = Value::Null;
            }
            chunks.push(sse_chunk(&id, created, model, header, None));

            chunks.push(sse_chunk(
                &id,
                created,
                model,
                json!({"tool_calls": [{"index": index, "function": {"arguments": arguments}}]}),
                None,
            ));
        }

        chunks.push(sse_chunk(&id, created, model, json!({}), Some("tool_calls")));
        chunks.push("data: [DONE]\n\n".to_string());
        return chunks;
    }

    chunks.push(sse_chunk(&id, created, model, json!({"role": "assistant", "content": ""}), None));

    if !accumulator.reasoning_content.is_empty() {
        for slice in char_slices(&accumulator.reasoning_content, FAKE_STREAM_CHUNK_CHARS) {
            chunks.push(sse_chunk(
                &id,
                created,
                model,
                json!({"reasoning_content": slice}),
                None,
            ));
        }
    }

    for slice in char_slices(&accumulator.content, FAKE_STREAM_CHUNK_CHARS) {
        chunks.push(sse_chunk(&id, created, model, json!({"content": slice}), None));
    }

    chunks.push(sse_chunk(&id, created, model, json!({}), Some("stop")));
    chunks.push("data: [DONE]\n\n".to_string());
    chunks
}

fn sse_chunk(id: &str, created: u64, model: &str, delta: Value, finish_reason: Option<&str>) -> String {
    let payload = json!({
        "id": id,
        "object": "chat.completion.chunk",
        "created": created,
        "model": model,
        "choices": [{
            "index": 0,
            "delta": delta,
            "finish_reason": finish_reason,
        }],
    });
    format!("data: {payload}\n\n")
}

fn char_slices(text: &str, slice_len: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(slice_len)
        .map(|c| c.iter().collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(fake_stream: bool) -> ResolvedBackend {
        ResolvedBackend {
            base_url: "https://example.com".to_string(),
            api_key: "k".to_string(),
            upstream_model: "model-a".to_string(),
            extra_headers: Default::default(),
            timeout_secs: 180,
            fake_stream,
        }
    }

    #[test]
    fn mode_selection_respects_fake_stream_flag() {
        assert_eq!(decide_mode(true, &backend(false)), RelayMode::Streaming);
        assert_eq!(decide_mode(true, &backend(true)), RelayMode::FakeStream);
        assert_eq!(decide_mode(false, &backend(true)), RelayMode::NonStreaming);
        assert_eq!(decide_mode(false, &backend(false)), RelayMode::NonStreaming);
    }

    #[test]
    fn char_slices_splits_into_fixed_width_pieces() {
        let slices = char_slices("hello world", 4);
        assert_eq!(slices, vec!["hell", "o wo", "rld"]);
    }

    #[test]
    fn char_slices_on_empty_text_is_empty() {
        assert!(char_slices("", 4).is_empty());
    }

    #[test]
    fn fake_stream_chunks_start_with_assistant_role_and_end_with_done() {
        let acc = RelayAccumulator {
            content: "hi".to_string(),
            reasoning_content: String::new(),
            citation_ids: vec![],
            tool_calls: None,
        };
        let chunks = build_fake_stream_chunks("model-a", &acc);
        assert!(chunks.first().unwrap().contains("\"role\":\"assistant\""));
        assert_eq!(chunks.last().unwrap(), "data: [DONE]\n\n");
        assert!(chunks[chunks.len() - 2].contains("\"finish_reason\":\"stop\""));
    }

    #[test]
    fn fake_stream_chunks_emit_reasoning_before_content() {
        let acc = RelayAccumulator {
            content: "ans".to_string(),
            reasoning_content: "think".to_string(),
            citation_ids: vec![],
            tool_calls: None,
        };
        let chunks = build_fake_stream_chunks("model-a", &acc);
        let reasoning_idx = chunks
            .iter()
            .position(|c| c.contains("reasoning_content"))
            .unwrap();
        let content_idx = chunks
            .iter()
            .position(|c| c.contains("\"content\":\"a"))
            .unwrap();
        assert!(reasoning_idx < content_idx);
    }

    #[test]
    fn rewrite_sse_line_strips_citation_marker_and_accumulates() {
        let acc = Arc::new(Mutex::new(RelayAccumulator::default()));
        let line = r#"data: {"choices":[{"delta":{"content":"see [[used:42]] here"}}]}"#;
        let rewritten = rewrite_sse_line(line, &acc).unwrap();
        assert!(!rewritten.contains("[[used"));
        let guard = acc.lock().unwrap();
        assert_eq!(guard.content, "see  here");
        assert_eq!(guard.citation_ids, vec!["42".to_string()]);
    }

    #[test]
    fn rewrite_sse_line_passes_done_through() {
        let acc = Arc::new(Mutex::new(RelayAccumulator::default()));
        let rewritten = rewrite_sse_line("data: [DONE]", &acc).unwrap();
        assert_eq!(rewritten, "data: [DONE]\n\n");
    }

    #[test]
    fn fake_stream_chunks_serialize_tool_calls_per_scenario_s2() {
        let acc = RelayAccumulator {
            content: String::new(),
            reasoning_content: String::new(),
            citation_ids: vec![],
            tool_calls: Some(vec![json!({
                "id": "c1",
                "function": {"name": "search_memory", "arguments": "{\"query\":\"x\"}"},
            })]),
        };
        let chunks = build_fake_stream_chunks("model-a", &acc);
        assert_eq!(chunks.len(), 4);

        let header: Value = serde_json::from_str(chunks[0].trim_start_matches("data: ").trim_end()).unwrap();
        let delta = &header["choices"][0]["delta"];
        assert_eq!(delta["role"], json!("assistant"));
        assert_eq!(delta["content"], Value::Null);
        assert_eq!(
            delta["tool_calls"][0],
            json!({"index": 0, "id": "c1", "type": "function", "function": {"name": "search_memory", "arguments": ""}})
        );

        let args_chunk: Value = serde_json::from_str(chunks[1].trim_start_matches("data: ").trim_end()).unwrap();
        assert_eq!(
            args_chunk["choices"][0]["delta"]["tool_calls"][0],
            json!({"index": 0, "function": {"arguments": "{\"query\":\"x\"}"}})
        );

        assert!(chunks[2].contains("\"finish_reason\":\"tool_calls\""));
        assert_eq!(chunks[3], "data: [DONE]\n\n");
    }
}
