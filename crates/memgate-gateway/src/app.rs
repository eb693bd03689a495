use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use dashmap::DashMap;
use memgate_core::config::GatewayConfig;
use memgate_inject::AutoInjectEngine;
use memgate_proxy::RelayClient;
use memgate_retrieval::{EmbeddingClient, HybridRetrieval, RerankClient, SynonymExpander};
use memgate_store::Store;
use memgate_summary::{SummaryLlm, SummaryPipeline};
use memgate_tools::MapsClient;
use tower_http::trace::TraceLayer;

/// Central shared state — passed as `Arc<AppState>` to every Axum handler.
/// Every field here is either `Clone`-cheap (an `Arc` or `reqwest::Client`
/// internally) or interior-mutable, so handlers only ever need a clone of
/// the `Arc<AppState>` itself — never a raw pointer (§5).
pub struct AppState {
    pub config: GatewayConfig,
    pub store: Store,
    pub relay: RelayClient,
    pub auto_inject: AutoInjectEngine,
    pub embedder: EmbeddingClient,
    pub synonyms: SynonymExpander,
    pub rerank: RerankClient,
    pub summary_llm: SummaryLlm,
    pub maps: MapsClient,
    pub notes_http: reqwest::Client,
    /// MCP session id -> last-seen timestamp, minted on `initialize` (§4.9).
    pub mcp_sessions: DashMap<String, chrono::DateTime<chrono::Utc>>,
}

impl AppState {
    pub fn new(config: GatewayConfig, store: Store) -> Self {
        let http = reqwest::Client::new();
        let summary_llm = SummaryLlm::new(
            http.clone(),
            config
                .providers
                .default_backend
                .as_ref()
                .and_then(|name| config.providers.backends.get(name))
                .map(|b| b.base_url.clone())
                .unwrap_or_default(),
            config
                .providers
                .default_backend
                .as_ref()
                .and_then(|name| config.providers.backends.get(name))
                .map(|b| b.api_key.clone())
                .unwrap_or_default(),
            config.embedding.model.clone(),
        );

        Self {
            relay: RelayClient::new(),
            auto_inject: AutoInjectEngine::new(),
            embedder: EmbeddingClient::new(http.clone(), config.embedding.clone()),
            synonyms: SynonymExpander::new(),
            rerank: RerankClient::new(http.clone(), config.rerank.clone()),
            summary_llm,
            maps: MapsClient::new(http.clone(), config.maps.clone()),
            notes_http: http,
            mcp_sessions: DashMap::new(),
            config,
            store,
        }
    }

    /// Builds the per-request hybrid retrieval pipeline. Cheap: every field
    /// is a borrow into `self`.
    pub fn retrieval(&self) -> HybridRetrieval<'_> {
        HybridRetrieval {
            store: &self.store,
            embedder: &self.embedder,
            synonyms: &self.synonyms,
            rerank: &self.rerank,
        }
    }

    /// Builds the per-request summary pipeline. Cheap, same reasoning as
    /// [`AppState::retrieval`].
    pub fn summary_pipeline(&self) -> SummaryPipeline<'_> {
        SummaryPipeline {
            store: &self.store,
            llm: &self.summary_llm,
            embedder: &self.embedder,
        }
    }
}

/// Assembles the full Axum router (§6): the OpenAI-compatible relay, the
/// HTTP-transport MCP tool surface, and the liveness/model-listing
/// endpoints. No WebSocket, webhook, or chat-widget surface — those were
/// part of the teacher's broader assistant product and have no counterpart
/// here.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/models", get(crate::http::models::models_handler))
        .route(
            "/v1/chat/completions",
            post(crate::http::openai_compat::chat_completions),
        )
        .route(
            "/mcp",
            post(crate::mcp_http::mcp_post)
                .get(crate::mcp_http::mcp_get)
                .delete(crate::mcp_http::mcp_delete),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
