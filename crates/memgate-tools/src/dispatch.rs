use chrono::Utc;
use memgate_core::config::NotesConfig;
use memgate_core::types::SceneType;
use memgate_retrieval::HybridRetrieval;
use memgate_store::Store;
use serde_json::{json, Value};
use tracing::warn;

use crate::maps::MapsClient;
use crate::schema::tool_list;
use crate::sticker::{pick_sticker, render_sticker};

/// Single-user deployment (§2): there is one conversational counterpart,
/// matching the original source's hardcoded user id.
const DEFAULT_USER_ID: &str = "dream";
const DEFAULT_CHANNEL: &str = "default";
const MAX_DIARIES_PER_DAY: i64 = 2;
/// Tool-level restriction on `update`: only these aux kinds are wired up,
/// even though the Store Adapter itself can touch any [`memgate_store::AUX_KINDS`].
const TOOL_UPDATABLE_KINDS: &[&str] = &["promise", "wishlist"];

pub struct ToolContext<'a> {
    pub store: &'a Store,
    pub retrieval: &'a HybridRetrieval<'a>,
    pub maps: &'a MapsClient,
    pub notes_http: &'a reqwest::Client,
    pub notes_config: &'a NotesConfig,
}

fn text_result(text: impl Into<String>) -> Value {
    json!({ "content": [{ "type": "text", "text": text.into() }] })
}

fn error_result(text: impl Into<String>) -> Value {
    json!({ "content": [{ "type": "text", "text": text.into() }], "isError": true })
}

/// `tools/list` response body.
pub fn list_tools() -> Value {
    json!({ "tools": tool_list() })
}

/// `tools/call` dispatch. Never returns a JSON-RPC error for a well-formed
/// call; an unsupported tool name or bad arguments become an `isError`
/// tool result instead (§4.9).
pub async fn call_tool(ctx: &ToolContext<'_>, name: &str, arguments: &Value) -> Value {
    match name {
        "search_memory" => search_memory(ctx, arguments).await,
        "init_context" => init_context(ctx, arguments).await,
        "save_diary" => save_diary(ctx, arguments).await,
        "send_sticker" => send_sticker(arguments),
        "geocode" => geocode(ctx, arguments).await,
        "around" => around(ctx, arguments).await,
        "search" => search_poi(ctx, arguments).await,
        "distance" => distance(ctx, arguments).await,
        "route" => route(ctx, arguments).await,
        "update" => update_record(ctx, arguments).await,
        other => error_result(format!("unknown tool: {other}")),
    }
}

fn arg_str<'a>(arguments: &'a Value, key: &str, default: &'a str) -> &'a str {
    arguments.get(key).and_then(|v| v.as_str()).unwrap_or(default)
}

fn arg_usize(arguments: &Value, key: &str, default: usize) -> usize {
    arguments
        .get(key)
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .unwrap_or(default)
}

async fn search_memory(ctx: &ToolContext<'_>, arguments: &Value) -> Value {
    let query = arg_str(arguments, "query", "");
    let limit = arg_usize(arguments, "limit", 5);
    let channel = arg_str(arguments, "channel", DEFAULT_CHANNEL);

    if query.is_empty() {
        return init_context(ctx, arguments).await;
    }

    let items = ctx
        .retrieval
        .search(query, channel, SceneType::Daily, limit)
        .await;

    let items = if items.is_empty() {
        match ctx.store.fuzzy_search(query, channel, SceneType::Daily, limit, limit).await {
            Ok(hits) => hits
                .turns
                .into_iter()
                .map(|t| {
                    format!(
                        "{}[{}] {}",
                        scene_tag(t.scene_type),
                        t.created_at.format("%m-%d %H:%M"),
                        t.user_msg
                    )
                })
                .collect::<Vec<_>>(),
            Err(e) => {
                warn!(error = %e, "search_memory fallback keyword search failed");
                Vec::new()
            }
        }
    } else {
        items
            .into_iter()
            .map(|item| {
                format!(
                    "{}[{}] {}",
                    scene_tag(item.scene_type),
                    item.created_at.format("%m-%d %H:%M"),
                    truncate(&item.text, 200)
                )
            })
            .collect()
    };

    if items.is_empty() {
        return text_result("没有找到相关的历史记忆。");
    }
    text_result(format!("找到{}条相关记忆：\n{}", items.len(), items.join("\n")))
}

async fn init_context(ctx: &ToolContext<'_>, arguments: &Value) -> Value {
    let limit = arg_usize(arguments, "limit", 4);
    let channel = arg_str(arguments, "channel", DEFAULT_CHANNEL);

    let summaries = ctx
        .store
        .get_recent_summaries(DEFAULT_USER_ID, channel, 2)
        .await
        .unwrap_or_default();
    let turns = ctx
        .store
        .get_recent_turns(DEFAULT_USER_ID, channel, limit)
        .await
        .unwrap_or_default();

    if summaries.is_empty() && turns.is_empty() {
        return text_result("暂无历史对话记录。");
    }

    let mut lines = Vec::new();
    for s in summaries.iter().rev() {
        lines.push(format!("[{}摘要] {}", s.scene_type, truncate(&s.text, 150)));
    }
    for t in turns.iter().rev() {
        lines.push(format!(
            "[{}] {}: {}",
            t.created_at.format("%m-%d %H:%M"),
            "user",
            truncate(&t.user_msg, 150)
        ));
        lines.push(format!("    assistant: {}", truncate(&t.assistant_msg, 150)));
    }

    text_result(format!("最近{}轮对话：\n{}", turns.len(), lines.join("\n")))
}

async fn save_diary(ctx: &ToolContext<'_>, arguments: &Value) -> Value {
    let Some(content) = arguments.get("content").and_then(|v| v.as_str()) else {
        return error_result("missing required field: content");
    };
    let mood = arguments.get("mood").and_then(|v| v.as_str());
    let today = Utc::now().format("%Y-%m-%d").to_string();

    let count = match ctx.store.count_diaries_on_day(DEFAULT_USER_ID, &today).await {
        Ok(n) => n,
        Err(e) => return error_result(format!("failed to check diary count: {e}")),
    };
    if count >= MAX_DIARIES_PER_DAY {
        return error_result(format!("already saved {MAX_DIARIES_PER_DAY} diaries today"));
    }

    let id = match ctx.store.insert_diary(DEFAULT_USER_ID, &today, content, mood).await {
        Ok(id) => id,
        Err(e) => return error_result(format!("failed to save diary: {e}")),
    };

    mirror_diary_to_notes(ctx, content, mood).await;

    text_result(format!("日记已保存 (id={id})"))
}

/// Best-effort mirror to the external notes service; failures are logged
/// and never surfaced to the tool caller (§4.10).
async fn mirror_diary_to_notes(ctx: &ToolContext<'_>, content: &str, mood: Option<&str>) {
    let Some(base_url) = &ctx.notes_config.base_url else {
        return;
    };
    let mut req = ctx
        .notes_http
        .post(format!("{base_url}/diaries"))
        .json(&json!({ "content": content, "mood": mood }));
    if let Some(token) = &ctx.notes_config.token {
        req = req.bearer_auth(token);
    }
    if let Err(e) = req.send().await {
        warn!(error = %e, "failed to mirror diary to notes service");
    }
}

fn send_sticker(arguments: &Value) -> Value {
    let mood = arg_str(arguments, "mood", "");
    let sticker = pick_sticker(mood);
    text_result(render_sticker(sticker))
}

async fn geocode(ctx: &ToolContext<'_>, arguments: &Value) -> Value {
    let Some(address) = arguments.get("address").and_then(|v| v.as_str()) else {
        return error_result("missing required field: address");
    };
    let city = arguments.get("city").and_then(|v| v.as_str());
    match ctx.maps.geocode(address, city).await {
        Some(value) => text_result(value.to_string()),
        None => error_result("geocode request failed"),
    }
}

async fn around(ctx: &ToolContext<'_>, arguments: &Value) -> Value {
    let Some(location) = arguments.get("location").and_then(|v| v.as_str()) else {
        return error_result("missing required field: location");
    };
    let keyword = arg_str(arguments, "keyword", "");
    let radius = arguments.get("radius").and_then(|v| v.as_u64()).unwrap_or(1000) as u32;
    match ctx.maps.around(location, keyword, radius).await {
        Some(value) => text_result(value.to_string()),
        None => error_result("around-search request failed"),
    }
}

async fn search_poi(ctx: &ToolContext<'_>, arguments: &Value) -> Value {
    let Some(keyword) = arguments.get("keyword").and_then(|v| v.as_str()) else {
        return error_result("missing required field: keyword");
    };
    let city = arguments.get("city").and_then(|v| v.as_str());
    match ctx.maps.search(keyword, city).await {
        Some(value) => text_result(value.to_string()),
        None => error_result("poi search request failed"),
    }
}

async fn distance(ctx: &ToolContext<'_>, arguments: &Value) -> Value {
    let (Some(origin), Some(destination)) = (
        arguments.get("origin").and_then(|v| v.as_str()),
        arguments.get("destination").and_then(|v| v.as_str()),
    ) else {
        return error_result("missing required fields: origin, destination");
    };
    match ctx.maps.distance(origin, destination).await {
        Some(value) => text_result(value.to_string()),
        None => error_result("distance request failed"),
    }
}

async fn route(ctx: &ToolContext<'_>, arguments: &Value) -> Value {
    let (Some(origin), Some(destination)) = (
        arguments.get("origin").and_then(|v| v.as_str()),
        arguments.get("destination").and_then(|v| v.as_str()),
    ) else {
        return error_result("missing required fields: origin, destination");
    };
    match ctx.maps.route(origin, destination).await {
        Some(value) => text_result(value.to_string()),
        None => error_result("route request failed"),
    }
}

async fn update_record(ctx: &ToolContext<'_>, arguments: &Value) -> Value {
    let Some(kind) = arguments.get("kind").and_then(|v| v.as_str()) else {
        return error_result("missing required field: kind");
    };
    if !TOOL_UPDATABLE_KINDS.contains(&kind) {
        return error_result(format!("unsupported kind for update: {kind}"));
    }
    let Some(id) = arguments.get("id").and_then(|v| v.as_i64()) else {
        return error_result("missing required field: id");
    };
    let fields = arguments.get("fields").cloned().unwrap_or(Value::Null);
    if !fields.is_object() {
        return error_result("fields must be an object");
    }

    match ctx.store.update_record(kind, id, &fields).await {
        Ok(()) => text_result(format!("{kind} {id} updated")),
        Err(e) => error_result(format!("update failed: {e}")),
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Matches the bracketed scene labels used by the auto-inject engine (§4.8).
fn scene_tag(scene: SceneType) -> &'static str {
    match scene {
        SceneType::Daily => "[日常]",
        SceneType::Plot => "[剧本]",
        SceneType::Meta => "[系统]",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_rejects_unsupported_kind() {
        assert!(!TOOL_UPDATABLE_KINDS.contains(&"expense"));
        assert!(TOOL_UPDATABLE_KINDS.contains(&"promise"));
        assert!(TOOL_UPDATABLE_KINDS.contains(&"wishlist"));
    }

    #[test]
    fn send_sticker_returns_markdown_image_text() {
        let result = send_sticker(&json!({ "mood": "开心" }));
        let text = result["content"][0]["text"].as_str().unwrap();
        assert!(text.starts_with('!'));
    }

    #[test]
    fn text_result_shape_has_no_is_error() {
        let result = text_result("hi");
        assert!(result.get("isError").is_none());
    }

    #[test]
    fn error_result_shape_sets_is_error() {
        let result = error_result("bad");
        assert_eq!(result["isError"], json!(true));
    }
}
