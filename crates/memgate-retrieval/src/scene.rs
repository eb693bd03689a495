use std::collections::HashMap;
use std::sync::Mutex;

use memgate_core::types::SceneType;

const META_KEYWORDS: &[&str] = &[
    "测试", "test", "mcp", "工具", "tool", "服务器", "server", "api", "debug", "调试", "接口",
    "endpoint", "日志", "log",
];

const PLOT_ENTER_KEYWORDS: &[&str] = &[
    "剧本", "来演", "来玩", "角色扮演", "rp", "继续剧情", "接着演", "开始演", "进入剧情", "剧情开始",
];

const PLOT_EXIT_KEYWORDS: &[&str] = &[
    "不玩了", "回来", "正常聊", "出戏", "暂停", "停一下", "别演了", "回到现实", "不演了",
];

/// Per-channel sticky scene state: `current` persists across turns except
/// for `meta`, which reverts to `daily` on the following message (§4.3).
#[derive(Debug, Clone, Copy)]
struct ChannelScene {
    current: SceneType,
    previous: SceneType,
}

impl Default for ChannelScene {
    fn default() -> Self {
        Self {
            current: SceneType::Daily,
            previous: SceneType::Daily,
        }
    }
}

/// Pure, deterministic classifier: daily / plot / meta. No I/O. Keeps a
/// process-local sticky state per channel, lost on restart (§3, §4.3).
pub struct SceneDetector {
    state: Mutex<HashMap<String, ChannelScene>>,
}

/// Result of detecting a message's scene: the decided scene and whether
/// it differs from the channel's prior scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SceneDecision {
    pub scene: SceneType,
    pub changed: bool,
}

impl Default for SceneDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneDetector {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Decides the scene for `user_msg` on `channel`, applying and
    /// persisting the sticky-state transition.
    pub fn detect(&self, channel: &str, user_msg: &str) -> SceneDecision {
        let mut states = self.state.lock().unwrap();
        let entry = states.entry(channel.to_string()).or_default();

        if user_msg.trim().is_empty() {
            return SceneDecision {
                scene: entry.current,
                changed: false,
            };
        }

        let lower = user_msg.to_lowercase();
        entry.previous = entry.current;

        if META_KEYWORDS.iter().any(|kw| lower.contains(*kw)) {
            let changed = entry.current != SceneType::Meta;
            entry.current = SceneType::Meta;
            return SceneDecision {
                scene: SceneType::Meta,
                changed,
            };
        }

        if PLOT_EXIT_KEYWORDS.iter().any(|kw| user_msg.contains(kw)) {
            let changed = entry.current != SceneType::Daily;
            entry.current = SceneType::Daily;
            return SceneDecision {
                scene: SceneType::Daily,
                changed,
            };
        }

        if PLOT_ENTER_KEYWORDS.iter().any(|kw| user_msg.contains(kw)) {
            let changed = entry.current != SceneType::Plot;
            entry.current = SceneType::Plot;
            return SceneDecision {
                scene: SceneType::Plot,
                changed,
            };
        }

        // meta is non-sticky: the message right after a meta turn reverts
        // to daily even though nothing else matched.
        if entry.previous == SceneType::Meta {
            entry.current = SceneType::Daily;
            return SceneDecision {
                scene: SceneType::Daily,
                changed: false,
            };
        }

        SceneDecision {
            scene: entry.current,
            changed: false,
        }
    }

    pub fn current(&self, channel: &str) -> SceneType {
        self.state
            .lock()
            .unwrap()
            .get(channel)
            .map(|s| s.current)
            .unwrap_or(SceneType::Daily)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_keyword_wins_and_is_non_sticky() {
        let det = SceneDetector::new();
        let d = det.detect("claude", "let's test the API endpoint");
        assert_eq!(d.scene, SceneType::Meta);
        assert!(d.changed);

        let d2 = det.detect("claude", "so anyway, what's new");
        assert_eq!(d2.scene, SceneType::Daily);
    }

    #[test]
    fn plot_enter_then_inherits_until_exit() {
        let det = SceneDetector::new();
        assert_eq!(det.detect("claude", "来演一个剧本吧").scene, SceneType::Plot);
        assert_eq!(det.detect("claude", "继续吧").scene, SceneType::Plot);
        assert_eq!(det.detect("claude", "好了不玩了").scene, SceneType::Daily);
    }

    #[test]
    fn empty_message_inherits_current_without_change() {
        let det = SceneDetector::new();
        det.detect("claude", "来演一个剧本吧");
        let d = det.detect("claude", "   ");
        assert_eq!(d.scene, SceneType::Plot);
        assert!(!d.changed);
    }
}
