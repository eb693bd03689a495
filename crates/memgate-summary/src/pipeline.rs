use memgate_core::types::SceneType;
use memgate_retrieval::EmbeddingClient;
use memgate_store::{NewSummary, RowKind, Store, Turn};
use serde::Deserialize;
use tracing::{info, warn};

/// Rounds between automatic summary generation (§4.7).
pub const SUMMARY_WINDOW_ROUNDS: i64 = 5;
const SUMMARY_MAX_TOKENS: u32 = 200;
const SUMMARY_TEMPERATURE: f32 = 0.3;

const SUMMARY_PROMPT_HEADER: &str = "请用2-3句话简洁总结以下对话的要点，保留关键信息（人名、事件、决定等）。\n只输出总结内容，不要有其他文字。\n\n对话内容：\n";

/// Minimal chat-completion client used only to generate summary text. Talks
/// to one fixed backend (configured separately from the Proxy Core's
/// per-request backend table, since summarization is an internal call,
/// not a client-facing relay).
pub struct SummaryLlm {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

impl SummaryLlm {
    pub fn new(http: reqwest::Client, base_url: String, api_key: String, model: String) -> Self {
        Self {
            http,
            base_url,
            api_key,
            model,
        }
    }

    async fn summarize(&self, conversation_text: &str) -> Option<String> {
        let prompt = format!("{SUMMARY_PROMPT_HEADER}{conversation_text}");
        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": self.model,
                "messages": [{"role": "user", "content": prompt}],
                "max_tokens": SUMMARY_MAX_TOKENS,
                "temperature": SUMMARY_TEMPERATURE,
            }))
            .send()
            .await;

        let resp = match resp {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                warn!(status = %r.status(), "summary LLM call returned non-200");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "summary LLM call failed");
                return None;
            }
        };

        match resp.json::<ChatResponse>().await {
            Ok(body) => body.choices.into_iter().next().map(|c| c.message.content.trim().to_string()),
            Err(e) => {
                warn!(error = %e, "failed to parse summary LLM response");
                None
            }
        }
    }
}

/// Digests conversation history into periodic summaries (§4.7).
pub struct SummaryPipeline<'a> {
    pub store: &'a Store,
    pub llm: &'a SummaryLlm,
    pub embedder: &'a EmbeddingClient,
}

impl<'a> SummaryPipeline<'a> {
    /// Runs the threshold check for (user, channel) and generates a
    /// summary if at least [`SUMMARY_WINDOW_ROUNDS`] rounds are pending.
    /// Intended to be invoked fire-and-forget after every completed chat
    /// request; errors are logged, never propagated.
    pub async fn check_and_generate(&self, user_id: &str, channel: &str) {
        if let Err(e) = self.try_check_and_generate(user_id, channel).await {
            warn!(user_id, channel, error = %e, "summary pipeline failed");
        }
    }

    async fn try_check_and_generate(&self, user_id: &str, channel: &str) -> anyhow::Result<()> {
        let current_round = self.store.next_round(user_id, channel).await? - 1;
        let last_summarized = self.store.get_last_summarized_round(user_id, channel).await?;
        let pending = current_round - last_summarized;

        if pending < SUMMARY_WINDOW_ROUNDS {
            return Ok(());
        }

        let start_round = last_summarized + 1;
        let end_round = last_summarized + SUMMARY_WINDOW_ROUNDS;

        let turns = self
            .store
            .get_turns_in_round_range(user_id, channel, start_round, end_round)
            .await?;
        if turns.is_empty() {
            return Ok(());
        }

        let scene_type = dominant_scene(&turns);
        let conversation_text = render_conversation(&turns);

        let Some(summary_text) = self.llm.summarize(&conversation_text).await else {
            return Ok(());
        };

        let summary_id = self
            .store
            .insert_summary(NewSummary {
                user_id: user_id.to_string(),
                channel: channel.to_string(),
                start_round,
                end_round,
                text: summary_text.clone(),
                scene_type,
            })
            .await?;

        info!(user_id, channel, start_round, end_round, "generated summary");

        if let Some(embedding) = self.embedder.embed(&summary_text).await {
            self.store
                .update_embedding(RowKind::Summary, summary_id, &embedding)
                .await?;
        }

        Ok(())
    }
}

/// Plurality vote over the window's turns; ties broken by the order
/// `Plot > Daily > Meta`, an arbitrary but deterministic tiebreak (§4.7
/// point 3, §9 open question).
fn dominant_scene(turns: &[Turn]) -> SceneType {
    let mut daily = 0;
    let mut plot = 0;
    let mut meta = 0;
    for t in turns {
        match t.scene_type {
            SceneType::Daily => daily += 1,
            SceneType::Plot => plot += 1,
            SceneType::Meta => meta += 1,
        }
    }
    if plot >= daily && plot >= meta {
        SceneType::Plot
    } else if daily >= meta {
        SceneType::Daily
    } else {
        SceneType::Meta
    }
}

fn render_conversation(turns: &[Turn]) -> String {
    let mut out = String::new();
    for t in turns {
        out.push_str(&format!("User: {}\nAssistant: {}\n\n", t.user_msg, t.assistant_msg));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn turn(scene: SceneType) -> Turn {
        Turn {
            id: 1,
            user_id: "u".into(),
            channel: "c".into(),
            round_number: 1,
            scene_type: scene,
            topic: None,
            emotion: None,
            weight: 0,
            created_at: Utc::now(),
            embedding: None,
            digested: false,
            user_msg: "hi".into(),
            assistant_msg: "hello".into(),
        }
    }

    #[test]
    fn dominant_scene_picks_plurality() {
        let turns = vec![turn(SceneType::Plot), turn(SceneType::Plot), turn(SceneType::Daily)];
        assert_eq!(dominant_scene(&turns), SceneType::Plot);
    }

    #[test]
    fn dominant_scene_prefers_plot_on_tie() {
        let turns = vec![turn(SceneType::Plot), turn(SceneType::Daily)];
        assert_eq!(dominant_scene(&turns), SceneType::Plot);
    }
}
