/// One entry in the static sticker catalog: display text, the mood tags it
/// answers to, and the image path rendered into a markdown link.
pub struct Sticker {
    pub text: &'static str,
    pub tags: &'static [&'static str],
    pub path: &'static str,
}

/// Small embedded catalog (§9A). Real deployments would likely pull this
/// from the notes service; kept static here since the set rarely changes.
pub const CATALOG: &[Sticker] = &[
    Sticker { text: "开心", tags: &["开心", "高兴", "快乐", "兴奋"], path: "/stickers/happy.png" },
    Sticker { text: "难过", tags: &["难过", "伤心", "委屈", "哭"], path: "/stickers/sad.png" },
    Sticker { text: "生气", tags: &["生气", "愤怒", "烦", "不爽"], path: "/stickers/angry.png" },
    Sticker { text: "害羞", tags: &["害羞", "脸红", "不好意思"], path: "/stickers/shy.png" },
    Sticker { text: "困了", tags: &["困", "累", "好累", "想睡"], path: "/stickers/sleepy.png" },
    Sticker { text: "撒娇", tags: &["撒娇", "想你", "抱抱"], path: "/stickers/cuddle.png" },
    Sticker { text: "疑惑", tags: &["疑惑", "奇怪", "好奇"], path: "/stickers/confused.png" },
    Sticker { text: "得意", tags: &["得意", "骄傲", "炫耀"], path: "/stickers/proud.png" },
];

/// Scores every catalog entry by substring overlap between `mood` and the
/// entry's tags, picking the best match; falls back to a pseudo-random
/// pick (index derived from `mood`'s byte sum, since the process has no
/// other source of randomness wired in here) when nothing overlaps.
pub fn pick_sticker(mood: &str) -> &'static Sticker {
    let mood = mood.trim();
    if !mood.is_empty() {
        let mut best: Option<(&'static Sticker, usize)> = None;
        for sticker in CATALOG {
            let score = sticker
                .tags
                .iter()
                .filter(|tag| mood.contains(**tag) || tag.contains(mood))
                .count();
            if score > 0 && best.map(|(_, best_score)| score > best_score).unwrap_or(true) {
                best = Some((sticker, score));
            }
        }
        if let Some((sticker, _)) = best {
            return sticker;
        }
    }
    let fallback_index = mood.bytes().map(|b| b as usize).sum::<usize>() % CATALOG.len();
    &CATALOG[fallback_index]
}

/// Renders a sticker as the text message format the chat surface expects:
/// a markdown image link.
pub fn render_sticker(sticker: &Sticker) -> String {
    format!("![{}]({})", sticker.text, sticker.path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_matching_mood() {
        let s = pick_sticker("今天好开心呀");
        assert_eq!(s.text, "开心");
    }

    #[test]
    fn falls_back_deterministically_on_unknown_mood() {
        let a = pick_sticker("quxyz");
        let b = pick_sticker("quxyz");
        assert_eq!(a.text, b.text);
    }

    #[test]
    fn empty_mood_falls_back() {
        let s = pick_sticker("");
        assert_eq!(s.text, CATALOG[0].text);
    }

    #[test]
    fn render_produces_markdown_image_link() {
        let s = pick_sticker("开心");
        assert_eq!(render_sticker(s), "![开心](/stickers/happy.png)");
    }
}
