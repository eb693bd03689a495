use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Number of conversation rounds a summary window covers.
pub const SUMMARY_WINDOW_ROUNDS: u32 = 5;
/// Hard deadline for the entire hybrid retrieval pipeline.
pub const HYBRID_RETRIEVAL_DEADLINE_MS: u64 = 3_000;
/// Timeout for a rerank call before falling back to the priority sort.
pub const RERANK_TIMEOUT_MS: u64 = 5_000;
/// Timeout for an embedding call before leaving the row's embedding null.
pub const EMBEDDING_TIMEOUT_MS: u64 = 30_000;
/// Tool-protocol SSE heartbeat cadence.
pub const MCP_SSE_HEARTBEAT_SECS: u64 = 25;
/// Default timeout for a non-"thinking" upstream backend.
pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 180;
/// Timeout for backends whose canonical name looks like a reasoning/thinking model.
pub const THINKING_UPSTREAM_TIMEOUT_SECS: u64 = 300;
/// Default port for the chat gateway.
pub const DEFAULT_GATEWAY_PORT: u16 = 8787;

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

/// Top-level config (gateway.toml + GATEWAY_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub rerank: RerankConfig,
    #[serde(default)]
    pub notes: NotesConfig,
    #[serde(default)]
    pub maps: MapsConfig,
    #[serde(default)]
    pub push: PushConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            providers: ProvidersConfig::default(),
            embedding: EmbeddingConfig::default(),
            rerank: RerankConfig::default(),
            notes: NotesConfig::default(),
            maps: MapsConfig::default(),
            push: PushConfig::default(),
            memory: MemoryConfig::default(),
        }
    }
}

/// Ports for the three HTTP services this process exposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Chat gateway (`/v1/chat/completions`, `/mcp`, `/health`, `/models`).
    #[serde(default = "default_gateway_port")]
    pub gateway_port: u16,
    /// Read-only notes/diary API port.
    #[serde(default = "default_notes_port")]
    pub notes_port: u16,
    /// Personal-assistant API port.
    #[serde(default = "default_assistant_port")]
    pub assistant_port: u16,
    /// Optional outbound HTTP proxy for non-loopback upstream requests.
    pub outbound_proxy: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            gateway_port: default_gateway_port(),
            notes_port: default_notes_port(),
            assistant_port: default_assistant_port(),
            outbound_proxy: None,
        }
    }
}

fn default_gateway_port() -> u16 {
    DEFAULT_GATEWAY_PORT
}
fn default_notes_port() -> u16 {
    8788
}
fn default_assistant_port() -> u16 {
    8789
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.memgate/memgate.db", home)
}

/// Backend + alias tables for the Proxy Core's model resolution (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    /// canonical name -> backend definition.
    #[serde(default)]
    pub backends: HashMap<String, BackendConfig>,
    /// short alias -> canonical name.
    #[serde(default)]
    pub aliases: HashMap<String, String>,
    /// Canonical name used when the requested model matches no alias, no
    /// backend, and carries no `/` (i.e. isn't an OpenRouter passthrough).
    pub default_backend: Option<String>,
    /// OpenRouter API key, used for passthrough requests (`model` containing `/`).
    pub openrouter_api_key: Option<String>,
    #[serde(default = "default_openrouter_base_url")]
    pub openrouter_base_url: String,
}

fn default_openrouter_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    pub api_key: String,
    /// The model name the upstream actually expects; defaults to the
    /// canonical name if omitted.
    pub upstream_model: Option<String>,
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
    /// Set for backends whose upstream has no real SSE streaming endpoint.
    /// A streaming client request is served by issuing a single
    /// non-streaming call and re-serializing the result as synthetic SSE
    /// chunks (§4.1 relay mode 3).
    #[serde(default)]
    pub fake_stream: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Embeddings of text-level rows older than this many days may be
    /// evicted by the background janitor (§4.7 point 6). Summaries are
    /// never evicted.
    #[serde(default = "default_eviction_days")]
    pub eviction_days: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            model: default_embedding_model(),
            eviction_days: default_eviction_days(),
        }
    }
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_eviction_days() -> u32 {
    7
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    #[serde(default = "default_rerank_model")]
    pub model: String,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            model: default_rerank_model(),
        }
    }
}

fn default_rerank_model() -> String {
    "rerank-v1".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NotesConfig {
    pub base_url: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MapsConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PushConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

/// Memory-subsystem tuning knobs: summary cadence, embedding eviction,
/// hybrid retrieval limits (§4.6, §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Rounds between automatic summary generation.
    #[serde(default = "default_summary_interval")]
    pub summary_interval_rounds: u32,
    /// Maximum rows returned by the keyword arm of hybrid retrieval.
    #[serde(default = "default_retrieval_limit")]
    pub keyword_limit: usize,
    /// Maximum rows returned by the vector arm of hybrid retrieval.
    #[serde(default = "default_retrieval_limit")]
    pub vector_limit: usize,
    /// Maximum rows surfaced to auto-inject after merge/rerank.
    #[serde(default = "default_inject_limit")]
    pub inject_limit: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            summary_interval_rounds: default_summary_interval(),
            keyword_limit: default_retrieval_limit(),
            vector_limit: default_retrieval_limit(),
            inject_limit: default_inject_limit(),
        }
    }
}

fn default_summary_interval() -> u32 {
    SUMMARY_WINDOW_ROUNDS
}
fn default_retrieval_limit() -> usize {
    20
}
fn default_inject_limit() -> usize {
    5
}

impl GatewayConfig {
    /// Loads configuration from a TOML file, then applies `GATEWAY_*`
    /// environment overrides (e.g. `GATEWAY_SERVER_GATEWAY_PORT=9000`).
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("GATEWAY_").split("_"))
            .extract()
    }

    /// Returns the timeout this backend's requests should use. Backends
    /// whose canonical name contains "think" or "reasoning" get the longer
    /// tier (§4.1 timeout rule).
    pub fn upstream_timeout_secs(&self, canonical_name: &str) -> u64 {
        let lower = canonical_name.to_ascii_lowercase();
        if lower.contains("think") || lower.contains("reasoning") {
            THINKING_UPSTREAM_TIMEOUT_SECS
        } else {
            DEFAULT_UPSTREAM_TIMEOUT_SECS
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_ports() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.server.gateway_port, DEFAULT_GATEWAY_PORT);
        assert_ne!(cfg.server.notes_port, cfg.server.assistant_port);
    }

    #[test]
    fn thinking_backend_gets_longer_timeout() {
        let cfg = GatewayConfig::default();
        assert_eq!(
            cfg.upstream_timeout_secs("deepseek-thinking"),
            THINKING_UPSTREAM_TIMEOUT_SECS
        );
        assert_eq!(
            cfg.upstream_timeout_secs("deepseek-chat"),
            DEFAULT_UPSTREAM_TIMEOUT_SECS
        );
    }
}
