use memgate_core::config::EmbeddingConfig;
use serde::Deserialize;
use tracing::warn;

/// Text is truncated to this many characters before being sent upstream
/// (§4.5).
const MAX_INPUT_CHARS: usize = 2000;

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

/// Thin client over an OpenAI-compatible embeddings endpoint. Every
/// failure mode (network error, non-200, malformed body) degrades to
/// `None` rather than propagating — the caller leaves the row's embedding
/// null and may retry later (§4.5).
pub struct EmbeddingClient {
    http: reqwest::Client,
    config: EmbeddingConfig,
}

impl EmbeddingClient {
    pub fn new(http: reqwest::Client, config: EmbeddingConfig) -> Self {
        Self { http, config }
    }

    pub async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }
        let base_url = self.config.base_url.as_ref()?;
        let truncated: String = trimmed.chars().take(MAX_INPUT_CHARS).collect();

        let mut req = self
            .http
            .post(format!("{base_url}/embeddings"))
            .json(&serde_json::json!({
                "model": self.config.model,
                "input": truncated,
            }));
        if let Some(key) = &self.config.api_key {
            req = req.bearer_auth(key);
        }

        let resp = match req.send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "embedding request failed");
                return None;
            }
        };

        if !resp.status().is_success() {
            warn!(status = %resp.status(), "embedding service returned non-200");
            return None;
        }

        match resp.json::<EmbeddingResponse>().await {
            Ok(mut body) if !body.data.is_empty() => Some(std::mem::take(&mut body.data[0].embedding)),
            Ok(_) => {
                warn!("embedding response carried no data");
                None
            }
            Err(e) => {
                warn!(error = %e, "failed to parse embedding response");
                None
            }
        }
    }
}
