pub const RECALL_KEYWORDS: &[&str] = &[
    "还记得", "之前", "上次", "以前", "那次", "我们曾经", "你记得", "还记不记得", "之前说", "上回",
    "有一次",
];

pub const PLOT_RECALL_KEYWORDS: &[&str] = &[
    "继续", "上次剧情", "之前演到", "接着上次", "上次的剧情", "之前的故事", "接着演",
];

pub const EMOTION_KEYWORDS: &[&str] = &[
    "想你", "难过", "开心", "emo", "伤心", "生气", "好累", "寂寞", "孤独", "想念", "高兴", "烦",
    "不开心", "沮丧", "焦虑",
];

pub fn first_match<'a>(msg: &str, keywords: &[&'a str]) -> Option<&'a str> {
    keywords.iter().find(|kw| msg.contains(**kw)).copied()
}
