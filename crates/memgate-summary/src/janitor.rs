use std::time::Duration;

use memgate_store::Store;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How often the janitor wakes up to check for stale embeddings.
const SWEEP_INTERVAL_SECS: u64 = 3_600;

/// Background service that evicts turn-level embeddings older than the
/// configured retention window. Summaries are never evicted (§4.7 point
/// 6, §9A supplemented features). Runs until `shutdown` is cancelled;
/// a single sweep failure is logged and the loop continues.
pub struct EmbeddingJanitor {
    store: Store,
    eviction_days: u32,
}

impl EmbeddingJanitor {
    pub fn new(store: Store, eviction_days: u32) -> Self {
        Self { store, eviction_days }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        info!(eviction_days = self.eviction_days, "embedding janitor started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("embedding janitor stopping");
                    return;
                }
                _ = tokio::time::sleep(Duration::from_secs(SWEEP_INTERVAL_SECS)) => {
                    self.sweep_once().await;
                }
            }
        }
    }

    async fn sweep_once(&self) {
        match self.store.evict_stale_turn_embeddings(self.eviction_days).await {
            Ok(n) if n > 0 => info!(evicted = n, "evicted stale turn embeddings"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "embedding eviction sweep failed"),
        }
    }
}
