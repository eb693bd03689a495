use memgate_core::types::SceneType;
use memgate_store::{Store, Summary, Turn};

use crate::embedding::EmbeddingClient;

/// A candidate row from either the turns or summaries table, normalized
/// for ranking and downstream merge with keyword-search hits.
#[derive(Debug, Clone)]
pub enum VectorHit {
    Turn(Turn),
    Summary(Summary),
}

impl VectorHit {
    pub fn id(&self) -> i64 {
        match self {
            VectorHit::Turn(t) => t.id,
            VectorHit::Summary(s) => s.id,
        }
    }

    pub fn created_at(&self) -> chrono::DateTime<chrono::Utc> {
        match self {
            VectorHit::Turn(t) => t.created_at,
            VectorHit::Summary(s) => s.created_at,
        }
    }

    fn embedding(&self) -> Option<&[f32]> {
        match self {
            VectorHit::Turn(t) => t.embedding.as_deref(),
            VectorHit::Summary(s) => s.embedding.as_deref(),
        }
    }
}

/// Embeds `query` and ranks the newest `3*limit` embedded candidates per
/// table by cosine similarity. The reference design prefers a database
/// stored procedure for this; the local SQLite store never exposes one,
/// so this is always the application-side fallback path (§4.5, §6).
pub async fn vector_search(
    store: &Store,
    embedder: &EmbeddingClient,
    query: &str,
    channel: &str,
    scene: SceneType,
    turn_limit: usize,
    summary_limit: usize,
) -> Vec<VectorHit> {
    let Some(query_embedding) = embedder.embed(query).await else {
        return Vec::new();
    };

    let Ok((turns, summaries)) = store
        .get_embedded_candidates(channel, scene, turn_limit * 3, summary_limit * 3)
        .await
    else {
        return Vec::new();
    };

    let mut scored: Vec<(f32, VectorHit)> = turns
        .into_iter()
        .map(VectorHit::Turn)
        .chain(summaries.into_iter().map(VectorHit::Summary))
        .filter_map(|hit| {
            let score = cosine_similarity(&query_embedding, hit.embedding()?);
            Some((score, hit))
        })
        .collect();

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored
        .into_iter()
        .take(turn_limit + summary_limit)
        .map(|(_, hit)| hit)
        .collect()
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_have_similarity_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn orthogonal_vectors_have_similarity_zero() {
        assert!((cosine_similarity(&[1.0, 0.0], &[0.0, 1.0])).abs() < 1e-6);
    }

    #[test]
    fn mismatched_lengths_are_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }
}
