use std::net::SocketAddr;
use std::sync::Arc;

use memgate_core::config::GatewayConfig;
use memgate_store::Store;
use memgate_summary::EmbeddingJanitor;
use tokio_util::sync::CancellationToken;
use tracing::info;

mod app;
mod capture;
mod http;
mod mcp_http;

const DEFAULT_CONFIG_PATH: &str = "gateway.toml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "memgate_gateway=info,tower_http=debug".into()),
        )
        .init();

    let config_path = std::env::var("GATEWAY_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = GatewayConfig::load(&config_path).unwrap_or_else(|e| {
        tracing::warn!(error = %e, path = config_path, "config load failed, using defaults");
        GatewayConfig::default()
    });

    let conn = rusqlite::Connection::open(&config.database.path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=3000;")?;
    let store = Store::new(conn)?;

    let eviction_days = config.embedding.eviction_days;
    let janitor = EmbeddingJanitor::new(store.clone(), eviction_days);
    let shutdown = CancellationToken::new();
    tokio::spawn(janitor.run(shutdown.clone()));

    let bind = config.server.bind.clone();
    let port = config.server.gateway_port;
    let state = Arc::new(app::AppState::new(config, store));
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!(%addr, "memgate gateway listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    shutdown.cancel();
    Ok(())
}
