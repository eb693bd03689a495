//! Fire-and-forget work that follows a completed chat relay: persisting the
//! turn, checking whether a summary window closed, embedding the new row,
//! and crediting any memories the model cited (§5 ordering guarantee: only
//! the *spawn order* capture -> summary-check -> embedding is deterministic,
//! all after the response has already been fully relayed to the client —
//! the three tasks themselves run concurrently once the turn is persisted).

use std::sync::Arc;

use memgate_core::types::SceneType;
use memgate_store::{NewTurn, RowKind};
use tracing::warn;

use crate::app::AppState;

pub struct CaptureJob {
    pub user_id: String,
    pub channel: String,
    pub scene: SceneType,
    pub user_msg: String,
    pub assistant_msg: String,
    pub citation_ids: Vec<String>,
}

/// Spawns the whole post-response pipeline on the current Tokio runtime and
/// returns immediately; failures are logged, never surfaced to a caller,
/// since the HTTP response has already gone out by the time this runs.
pub fn spawn(state: Arc<AppState>, job: CaptureJob) {
    tokio::spawn(async move {
        let turn_id = match state
            .store
            .insert_turn(NewTurn {
                user_id: job.user_id.clone(),
                channel: job.channel.clone(),
                scene_type: job.scene,
                topic: None,
                emotion: None,
                user_msg: job.user_msg,
                assistant_msg: job.assistant_msg,
            })
            .await
        {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "failed to persist turn");
                return;
            }
        };

        let summary_pipeline = state.summary_pipeline();
        let citations = credit_citations(&state, &job.citation_ids);
        let summary_check = summary_pipeline.check_and_generate(&job.user_id, &job.channel);
        let embedding = async {
            if let Some(turn_id) = turn_id {
                embed_turn(&state, turn_id).await;
            }
        };

        tokio::join!(citations, summary_check, embedding);
    });
}

/// Citation markers name a turn id as a string (§4.1); malformed ids are
/// skipped rather than failing the whole batch.
async fn credit_citations(state: &AppState, citation_ids: &[String]) {
    for raw_id in citation_ids {
        let Ok(turn_id) = raw_id.parse::<i64>() else {
            warn!(raw_id, "citation marker did not name a numeric turn id");
            continue;
        };
        if let Err(e) = state.store.increment_weight(turn_id).await {
            warn!(error = %e, turn_id, "failed to credit citation weight");
        }
    }
}

async fn embed_turn(state: &AppState, turn_id: i64) {
    let Ok(turns) = state.store.get_unembedded(50).await else {
        return;
    };
    let Some(turn) = turns.into_iter().find(|t| t.id == turn_id) else {
        return;
    };
    let text = format!("{}\n{}", turn.user_msg, turn.assistant_msg);
    let Some(embedding) = state.embedder.embed(&text).await else {
        return;
    };
    if let Err(e) = state
        .store
        .update_embedding(RowKind::Turn, turn_id, &embedding)
        .await
    {
        warn!(error = %e, turn_id, "failed to store turn embedding");
    }
}
