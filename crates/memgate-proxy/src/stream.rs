/// Parses a single SSE line. SSE frames look like `event: <type>\ndata:
/// <json>\n\n`; most OpenAI-compatible backends only ever send `data:`
/// lines, terminated by the literal `data: [DONE]`.
pub fn parse_sse_line(line: &str) -> Option<SseParsed> {
    if let Some(event_type) = line.strip_prefix("event: ") {
        Some(SseParsed::Event(event_type.to_string()))
    } else {
        line.strip_prefix("data: ")
            .map(|data| SseParsed::Data(data.to_string()))
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum SseParsed {
    Event(String),
    Data(String),
}

pub const DONE_SENTINEL: &str = "[DONE]";

/// Accumulates `choices[0].delta.content`, `.reasoning_content`, and
/// `.tool_calls` across a true-streaming relay while the raw SSE bytes are
/// forwarded untouched to the client (§4.1 relay mode 1).
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    pub content: String,
    pub reasoning_content: String,
    pub tool_calls: Vec<serde_json::Value>,
}

impl StreamAccumulator {
    /// Feeds one `data: ` payload (already stripped of the prefix). A
    /// malformed chunk is ignored — accumulation is best-effort and must
    /// never interrupt the byte relay.
    pub fn absorb(&mut self, data: &str) {
        if data == DONE_SENTINEL {
            return;
        }
        let Ok(value) = serde_json::from_str::<serde_json::Value>(data) else {
            return;
        };
        let Some(delta) = value
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("delta"))
        else {
            return;
        };
        if let Some(s) = delta.get("content").and_then(|v| v.as_str()) {
            self.content.push_str(s);
        }
        if let Some(s) = delta.get("reasoning_content").and_then(|v| v.as_str()) {
            self.reasoning_content.push_str(s);
        }
        if let Some(deltas) = delta.get("tool_calls").and_then(|v| v.as_array()) {
            self.absorb_tool_call_deltas(deltas);
        }
    }

    /// Merges one `delta.tool_calls` array into the running per-index
    /// accumulation: `id`/`type`/`function.name` are set once, and
    /// `function.arguments` is appended across successive deltas.
    fn absorb_tool_call_deltas(&mut self, deltas: &[serde_json::Value]) {
        for call_delta in deltas {
            let Some(index) = call_delta.get("index").and_then(|v| v.as_u64()) else {
                continue;
            };
            let index = index as usize;
            while self.tool_calls.len() <= index {
                self.tool_calls.push(serde_json::json!({
                    "id": "",
                    "type": "function",
                    "function": {"name": "", "arguments": ""},
                }));
            }
            let slot = &mut self.tool_calls[index];
            if let Some(id) = call_delta.get("id").and_then(|v| v.as_str()) {
                slot["id"] = serde_json::json!(id);
            }
            if let Some(name) = call_delta
                .get("function")
                .and_then(|f| f.get("name"))
                .and_then(|v| v.as_str())
            {
                slot["function"]["name"] = serde_json::json!(name);
            }
            if let Some(args) = call_delta
                .get("function")
                .and_then(|f| f.get("arguments"))
                .and_then(|v| v.as_str())
            {
                let existing = slot["function"]["arguments"].as_str().unwrap_or_default();
                slot["function"]["arguments"] = serde_json::json!(format!("{existing}{args}"));
            }
        }
    }
}

/// Splits raw SSE bytes across chunk boundaries, buffering any partial
/// trailing line for the next `feed` call — upstream chunk boundaries
/// never line up with `\n` boundaries.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    buffer: String,
}

impl SseLineBuffer {
    /// Appends `chunk` and returns every complete line extracted so far.
    /// The in-progress remainder (if any) is retained for the next call.
    pub fn feed(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line = self.buffer[..pos].trim_end_matches('\r').to_string();
            self.buffer.drain(..=pos);
            lines.push(line);
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_sse_line_recognizes_data_and_event() {
        assert_eq!(
            parse_sse_line("data: {\"a\":1}"),
            Some(SseParsed::Data("{\"a\":1}".to_string()))
        );
        assert_eq!(
            parse_sse_line("event: message"),
            Some(SseParsed::Event("message".to_string()))
        );
        assert_eq!(parse_sse_line("not a frame"), None);
    }

    #[test]
    fn accumulator_absorbs_content_and_reasoning() {
        let mut acc = StreamAccumulator::default();
        acc.absorb(r#"{"choices":[{"delta":{"content":"hel"}}]}"#);
        acc.absorb(r#"{"choices":[{"delta":{"content":"lo"}}]}"#);
        acc.absorb(r#"{"choices":[{"delta":{"reasoning_content":"hm"}}]}"#);
        assert_eq!(acc.content, "hello");
        assert_eq!(acc.reasoning_content, "hm");
    }

    #[test]
    fn accumulator_ignores_done_and_malformed() {
        let mut acc = StreamAccumulator::default();
        acc.absorb("[DONE]");
        acc.absorb("not json");
        assert_eq!(acc.content, "");
    }

    #[test]
    fn accumulator_merges_tool_call_deltas_by_index() {
        let mut acc = StreamAccumulator::default();
        acc.absorb(r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c1","type":"function","function":{"name":"search_memory","arguments":""}}]}}]}"#);
        acc.absorb(r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"query\":"}}]}}]}"#);
        acc.absorb(r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"x\"}"}}]}}]}"#);
        assert_eq!(acc.tool_calls.len(), 1);
        assert_eq!(acc.tool_calls[0]["id"], "c1");
        assert_eq!(acc.tool_calls[0]["function"]["name"], "search_memory");
        assert_eq!(acc.tool_calls[0]["function"]["arguments"], "{\"query\":\"x\"}");
    }

    #[test]
    fn line_buffer_holds_partial_line_across_feeds() {
        let mut buf = SseLineBuffer::default();
        assert_eq!(buf.feed("data: {\"a\":"), Vec::<String>::new());
        let lines = buf.feed("1}\ndata: next\n");
        assert_eq!(lines, vec!["data: {\"a\":1}".to_string(), "data: next".to_string()]);
    }
}
