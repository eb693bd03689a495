use chrono::{DateTime, Utc};
use dashmap::DashMap;
use memgate_core::types::SceneType;
use memgate_retrieval::{HybridRetrieval, RetrievedItem, SceneDetector};
use memgate_store::Store;
use tracing::info;

use crate::keywords;

/// Hard cap on injected text, matching the reference design's budget
/// (§4.8 rule table).
pub const MAX_INJECT_CHARS: usize = 500;

const COLD_START_SUMMARY_COUNT: usize = 2;
const COLD_START_TURN_COUNT: usize = 3;
const EMOTION_LOOKBACK_DAYS: u32 = 3;
const EMOTION_LIMIT: usize = 3;
const RECALL_LIMIT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rule {
    Skip,
    ColdStart,
    PlotRecall,
    Recall,
    Emotion,
    Default,
}

/// Per-request rule engine: detects cold-start / recall / plot / emotion
/// triggers and splices retrieved memories into the system prompt before
/// the Proxy Core dispatches upstream (§4.8).
pub struct AutoInjectEngine {
    rounds: DashMap<String, u64>,
    scene_detector: SceneDetector,
}

impl Default for AutoInjectEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl AutoInjectEngine {
    pub fn new() -> Self {
        Self {
            rounds: DashMap::new(),
            scene_detector: SceneDetector::new(),
        }
    }

    fn round_key(user_id: &str, channel: &str) -> String {
        format!("{user_id}_{channel}")
    }

    /// Increments and returns the round counter for (user, channel).
    /// Process-local, reset on restart (§3).
    pub fn increment_round(&self, user_id: &str, channel: &str) -> u64 {
        let key = Self::round_key(user_id, channel);
        let mut entry = self.rounds.entry(key).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Scene last decided for `channel` by [`Self::process`]. Used after a
    /// request completes to tag the persisted turn with the scene it was
    /// answered under, without re-running detection.
    pub fn current_scene(&self, channel: &str) -> SceneType {
        self.scene_detector.current(channel)
    }

    /// Runs the engine for one request: advances the round counter,
    /// consults the Scene Detector, evaluates the rule table, retrieves
    /// memories if a rule fired, and returns the text block to splice
    /// into the system prompt (or `None` if nothing should be injected).
    pub async fn process(
        &self,
        store: &Store,
        retrieval: &HybridRetrieval<'_>,
        user_id: &str,
        channel: &str,
        user_msg: &str,
    ) -> Option<String> {
        let round = self.increment_round(user_id, channel);
        let decision = self.scene_detector.detect(channel, user_msg);

        let (rule, query) = detect_rule(user_msg, decision.scene, round);
        if rule == Rule::Skip || rule == Rule::Default {
            return None;
        }

        info!(rule = ?rule, round, channel, "auto-inject rule triggered");

        let memory_text = match rule {
            Rule::ColdStart => cold_start(store, user_id, channel).await,
            Rule::Recall => {
                let items = retrieval.search(&query, channel, decision.scene, RECALL_LIMIT).await;
                format_results(&items)
            }
            Rule::PlotRecall => {
                let items = retrieval.search(&query, channel, SceneType::Plot, RECALL_LIMIT).await;
                format_results(&items)
            }
            Rule::Emotion => {
                let turns = store
                    .get_recent_by_emotion(channel, &query, EMOTION_LOOKBACK_DAYS, EMOTION_LIMIT)
                    .await
                    .unwrap_or_default();
                format_turns(&turns)
            }
            Rule::Skip | Rule::Default => None,
        };

        memory_text.map(|text| truncate_chars(&text, MAX_INJECT_CHARS))
    }

    /// Wraps retrieved memory text in the delimiter block spliced onto the
    /// end of the system prompt's content.
    pub fn render_inject_block(memory_text: &str) -> String {
        format!(
            "\n\n---\n[记忆参考 - 仅供自然融入对话，不要机械引用]\n\n{memory_text}\n\n\
注意：以上记忆仅供参考。标记为[剧本]的内容是角色扮演剧情，不是真实事件。\n\
带时间戳的内容请注意时效性，过去的安排不代表当前状态。\n---"
        )
    }
}

fn detect_rule(user_msg: &str, scene: SceneType, round: u64) -> (Rule, String) {
    if user_msg.trim().is_empty() {
        return (Rule::Default, String::new());
    }
    if scene == SceneType::Meta {
        return (Rule::Skip, String::new());
    }
    if round == 1 {
        return (Rule::ColdStart, String::new());
    }
    if scene == SceneType::Plot {
        if let Some(_kw) = keywords::first_match(user_msg, keywords::PLOT_RECALL_KEYWORDS) {
            return (Rule::PlotRecall, user_msg.to_string());
        }
    }
    if let Some(_kw) = keywords::first_match(user_msg, keywords::RECALL_KEYWORDS) {
        return (Rule::Recall, user_msg.to_string());
    }
    if let Some(kw) = keywords::first_match(user_msg, keywords::EMOTION_KEYWORDS) {
        return (Rule::Emotion, kw.to_string());
    }
    (Rule::Default, String::new())
}

async fn cold_start(store: &Store, user_id: &str, channel: &str) -> Option<String> {
    let summaries = store
        .get_recent_summaries(user_id, channel, COLD_START_SUMMARY_COUNT)
        .await
        .unwrap_or_default();
    let turns = store
        .get_recent_turns(user_id, channel, COLD_START_TURN_COUNT)
        .await
        .unwrap_or_default();

    if summaries.is_empty() && turns.is_empty() {
        return None;
    }

    let mut lines = Vec::new();
    if !summaries.is_empty() {
        lines.push("[最近的对话摘要]".to_string());
        for s in summaries.iter().rev() {
            lines.push(format!(
                "{}({}) {}",
                scene_tag(s.scene_type),
                format_time(s.created_at),
                truncate_chars(&s.text, 150)
            ));
        }
    }
    if !turns.is_empty() {
        lines.push(String::new());
        lines.push("[最近的对话]".to_string());
        for t in turns.iter().rev() {
            lines.push(format!(
                "{}({}) Dream: {}",
                scene_tag(t.scene_type),
                format_time(t.created_at),
                truncate_chars(&t.user_msg, 100)
            ));
            lines.push(format!("  AI: {}", truncate_chars(&t.assistant_msg, 100)));
        }
    }

    Some(lines.join("\n"))
}

/// Renders hits from the `Recall`/`PlotRecall` rules. A turn's text is
/// `"{user_msg}\n{assistant_msg}"` (see [`RetrievedItem::from_turn`]) and is
/// previewed as two 80-char lines; a summary has no embedded newline and is
/// previewed as a single 150-char line (§4.8).
fn format_results(items: &[RetrievedItem]) -> Option<String> {
    if items.is_empty() {
        return None;
    }
    let mut lines = Vec::new();
    for item in items {
        let tag = scene_tag(item.scene_type);
        let time = format_time(item.created_at);
        if let Some((user_msg, assistant_msg)) = item.text.split_once('\n') {
            lines.push(format!("{tag}({time}) Dream: {}", truncate_chars(user_msg, 80)));
            lines.push(format!("  AI: {}", truncate_chars(assistant_msg, 80)));
        } else {
            lines.push(format!("{tag}({time}) {}", truncate_chars(&item.text, 150)));
        }
    }
    Some(lines.join("\n"))
}

fn format_turns(turns: &[memgate_store::Turn]) -> Option<String> {
    if turns.is_empty() {
        return None;
    }
    let mut lines = Vec::new();
    for t in turns {
        lines.push(format!(
            "{}({}) Dream: {}",
            scene_tag(t.scene_type),
            format_time(t.created_at),
            truncate_chars(&t.user_msg, 80)
        ));
        lines.push(format!("  AI: {}", truncate_chars(&t.assistant_msg, 80)));
    }
    Some(lines.join("\n"))
}

fn scene_tag(scene: SceneType) -> &'static str {
    match scene {
        SceneType::Daily => "[日常]",
        SceneType::Plot => "[剧本]",
        SceneType::Meta => "[系统]",
    }
}

/// `月日 时:分` in UTC+8, matching the reference design's local-time
/// convention.
fn format_time(dt: DateTime<Utc>) -> String {
    let local = dt + chrono::Duration::hours(8);
    local.format("%m月%d日 %H:%M").to_string()
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cold_start_fires_on_round_one() {
        let (rule, _) = detect_rule("hello", SceneType::Daily, 1);
        assert_eq!(rule, Rule::ColdStart);
    }

    #[test]
    fn meta_scene_skips_regardless_of_round() {
        let (rule, _) = detect_rule("还记得吗", SceneType::Meta, 2);
        assert_eq!(rule, Rule::Skip);
    }

    #[test]
    fn recall_keyword_triggers_recall_rule() {
        let (rule, query) = detect_rule("你还记得上次的事吗", SceneType::Daily, 2);
        assert_eq!(rule, Rule::Recall);
        assert!(!query.is_empty());
    }

    #[test]
    fn plot_scene_with_recall_keyword_triggers_plot_recall() {
        let (rule, _) = detect_rule("继续上次剧情吧", SceneType::Plot, 2);
        assert_eq!(rule, Rule::PlotRecall);
    }

    #[test]
    fn emotion_keyword_triggers_emotion_rule() {
        let (rule, query) = detect_rule("今天好累啊", SceneType::Daily, 2);
        assert_eq!(rule, Rule::Emotion);
        assert_eq!(query, "好累");
    }

    #[test]
    fn no_keyword_defaults_to_no_injection() {
        let (rule, _) = detect_rule("今天天气不错", SceneType::Daily, 2);
        assert_eq!(rule, Rule::Default);
    }
}
