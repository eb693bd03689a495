use std::collections::HashMap;

use memgate_core::GatewayConfig;

use crate::error::{ProxyError, Result};

/// A fully resolved upstream target: where to send the request, how to
/// authenticate, what model name the upstream actually expects, and how
/// long to wait before giving up (§4.1 model resolution).
#[derive(Debug, Clone)]
pub struct ResolvedBackend {
    pub base_url: String,
    pub api_key: String,
    pub upstream_model: String,
    pub extra_headers: HashMap<String, String>,
    pub timeout_secs: u64,
    pub fake_stream: bool,
}

/// Resolves a client-requested model name to a concrete upstream target.
///
/// Two-stage lookup: the requested name is first treated as an alias and
/// translated to a canonical name; the canonical name is then looked up in
/// the backend table. A canonical name containing `/` that matches no
/// configured backend is forwarded to OpenRouter verbatim. Anything else
/// falls back to `providers.default_backend`, or fails.
pub fn resolve(config: &GatewayConfig, requested_model: &str) -> Result<ResolvedBackend> {
    let providers = &config.providers;
    let canonical = providers
        .aliases
        .get(requested_model)
        .map(String::as_str)
        .unwrap_or(requested_model);

    if let Some(backend) = providers.backends.get(canonical) {
        return Ok(from_backend_config(config, canonical, backend));
    }

    if canonical.contains('/') {
        return Ok(openrouter_passthrough(config, canonical));
    }

    if let Some(default_name) = &providers.default_backend {
        if let Some(backend) = providers.backends.get(default_name) {
            return Ok(from_backend_config(config, default_name, backend));
        }
    }

    if providers.openrouter_api_key.is_some() {
        return Ok(openrouter_passthrough(config, canonical));
    }

    Err(ProxyError::UnknownModel(requested_model.to_string()))
}

fn from_backend_config(
    config: &GatewayConfig,
    canonical_name: &str,
    backend: &memgate_core::config::BackendConfig,
) -> ResolvedBackend {
    ResolvedBackend {
        base_url: backend.base_url.clone(),
        api_key: backend.api_key.clone(),
        upstream_model: backend
            .upstream_model
            .clone()
            .unwrap_or_else(|| canonical_name.to_string()),
        extra_headers: backend.extra_headers.clone(),
        timeout_secs: config.upstream_timeout_secs(canonical_name),
        fake_stream: backend.fake_stream,
    }
}

/// OpenRouter requires `HTTP-Referer` and `X-Title` on every request or it
/// may down-rank or reject the call (§6).
fn openrouter_passthrough(config: &GatewayConfig, model: &str) -> ResolvedBackend {
    let mut extra_headers = HashMap::new();
    extra_headers.insert("HTTP-Referer".to_string(), "https://memgate.local".to_string());
    extra_headers.insert("X-Title".to_string(), "memgate".to_string());

    ResolvedBackend {
        base_url: config.providers.openrouter_base_url.clone(),
        api_key: config.providers.openrouter_api_key.clone().unwrap_or_default(),
        upstream_model: model.to_string(),
        extra_headers,
        timeout_secs: config.upstream_timeout_secs(model),
        fake_stream: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memgate_core::config::BackendConfig;

    fn config_with(
        backends: Vec<(&str, &str)>,
        aliases: Vec<(&str, &str)>,
        default_backend: Option<&str>,
    ) -> GatewayConfig {
        let mut cfg = GatewayConfig::default();
        for (name, url) in backends {
            cfg.providers.backends.insert(
                name.to_string(),
                BackendConfig {
                    base_url: url.to_string(),
                    api_key: "k".to_string(),
                    upstream_model: None,
                    extra_headers: HashMap::new(),
                    fake_stream: false,
                },
            );
        }
        for (alias, canonical) in aliases {
            cfg.providers
                .aliases
                .insert(alias.to_string(), canonical.to_string());
        }
        cfg.providers.default_backend = default_backend.map(str::to_string);
        cfg
    }

    #[test]
    fn resolves_alias_to_backend() {
        let cfg = config_with(
            vec![("deepseek-chat", "https://api.deepseek.com")],
            vec![("ds", "deepseek-chat")],
            None,
        );
        let resolved = resolve(&cfg, "ds").unwrap();
        assert_eq!(resolved.base_url, "https://api.deepseek.com");
        assert_eq!(resolved.upstream_model, "deepseek-chat");
    }

    #[test]
    fn slash_in_canonical_name_falls_through_to_openrouter() {
        let mut cfg = config_with(vec![], vec![], None);
        cfg.providers.openrouter_api_key = Some("or-key".to_string());
        let resolved = resolve(&cfg, "anthropic/claude-3.5-sonnet").unwrap();
        assert_eq!(resolved.base_url, cfg.providers.openrouter_base_url);
        assert_eq!(resolved.upstream_model, "anthropic/claude-3.5-sonnet");
    }

    #[test]
    fn unmatched_model_without_default_or_openrouter_key_errors() {
        let cfg = config_with(vec![], vec![], None);
        assert!(resolve(&cfg, "mystery-model").is_err());
    }

    #[test]
    fn falls_back_to_default_backend() {
        let cfg = config_with(
            vec![("fallback", "https://fallback.example")],
            vec![],
            Some("fallback"),
        );
        let resolved = resolve(&cfg, "anything-else").unwrap();
        assert_eq!(resolved.base_url, "https://fallback.example");
    }

    #[test]
    fn thinking_backend_name_gets_longer_timeout() {
        let cfg = config_with(
            vec![("deepseek-thinking", "https://api.deepseek.com")],
            vec![],
            None,
        );
        let resolved = resolve(&cfg, "deepseek-thinking").unwrap();
        assert_eq!(
            resolved.timeout_secs,
            memgate_core::config::THINKING_UPSTREAM_TIMEOUT_SECS
        );
    }
}
