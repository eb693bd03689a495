use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use memgate_core::types::SceneType;
use rusqlite::Connection;
use serde_json::Value;
use tracing::warn;

use crate::error::{StoreError, StoreResult};
use crate::types::{
    DiaryEntry, FuzzyHits, NewSummary, NewTurn, RowKind, Summary, Turn, AUX_KINDS,
};

/// Prompt-engineering markers that mark a user message as machine-generated
/// rather than something a real user said. Case-insensitive substring match.
const SYSTEM_MESSAGE_MARKERS: &[&str] = &[
    "<content>",
    "summarize",
    "summary",
    "总结",
    "标题",
    "title",
    "i will give you",
    "system_auto",
    "health_check",
    "你是一个",
    "you are a",
    "as an ai",
    "作为ai",
];

/// Rejects messages that are empty, too short, or look machine-generated
/// rather than user-authored (§4.2 system-message filter).
pub fn is_system_message(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.chars().count() < 2 {
        return true;
    }
    let lower = trimmed.to_lowercase();
    SYSTEM_MESSAGE_MARKERS.iter().any(|m| lower.contains(m))
}

/// Store Adapter: typed, `async`-shaped access to the relational store.
/// Every operation offloads its synchronous rusqlite call onto a blocking
/// thread via `tokio::task::spawn_blocking` so the request reactor is
/// never blocked by disk I/O (§4.2).
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn new(conn: Connection) -> StoreResult<Self> {
        crate::db::init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run_blocking<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap();
            f(&guard)
        })
        .await?
    }

    /// Next round number for (user, channel). Best-effort, not globally
    /// atomic: reading `max(round_number)+1` races under concurrent bursts,
    /// and duplicate round numbers are tolerated downstream (§4.2).
    pub async fn next_round(&self, user_id: &str, channel: &str) -> StoreResult<i64> {
        let user_id = user_id.to_string();
        let channel = channel.to_string();
        self.run_blocking(move |conn| {
            let max: Option<i64> = conn
                .query_row(
                    "SELECT MAX(round_number) FROM turns WHERE user_id = ?1 AND channel = ?2",
                    rusqlite::params![user_id, channel],
                    |row| row.get(0),
                )
                .unwrap_or(None);
            Ok(max.unwrap_or(0) + 1)
        })
        .await
    }

    /// Applies the system-message filter, allocates a round number, and
    /// persists the turn. Returns `None` if the turn was filtered out.
    pub async fn insert_turn(&self, turn: NewTurn) -> StoreResult<Option<i64>> {
        if is_system_message(&turn.user_msg) || turn.assistant_msg.trim().is_empty() {
            return Ok(None);
        }
        let round_number = self.next_round(&turn.user_id, &turn.channel).await?;
        self.run_blocking(move |conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO turns
                 (user_id, channel, round_number, scene_type, topic, emotion,
                  weight, created_at, embedding, digested, user_msg, assistant_msg)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, NULL, 0, ?8, ?9)",
                rusqlite::params![
                    turn.user_id,
                    turn.channel,
                    round_number,
                    turn.scene_type.as_str(),
                    turn.topic,
                    turn.emotion,
                    now,
                    turn.user_msg,
                    turn.assistant_msg,
                ],
            )?;
            Ok(Some(conn.last_insert_rowid()))
        })
        .await
    }

    pub async fn get_recent_turns(
        &self,
        user_id: &str,
        channel: &str,
        limit: usize,
    ) -> StoreResult<Vec<Turn>> {
        let user_id = user_id.to_string();
        let channel = channel.to_string();
        self.run_blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, channel, round_number, scene_type, topic, emotion,
                        weight, created_at, embedding, digested, user_msg, assistant_msg
                 FROM turns WHERE user_id = ?1 AND channel = ?2
                 ORDER BY round_number DESC LIMIT ?3",
            )?;
            let rows = stmt.query_map(rusqlite::params![user_id, channel, limit as i64], row_to_turn)?;
            let mut out: Vec<Turn> = rows.filter_map(|r| r.ok()).collect();
            out.reverse();
            Ok(out)
        })
        .await
    }

    pub async fn get_turns_in_round_range(
        &self,
        user_id: &str,
        channel: &str,
        start: i64,
        end: i64,
    ) -> StoreResult<Vec<Turn>> {
        let user_id = user_id.to_string();
        let channel = channel.to_string();
        self.run_blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, channel, round_number, scene_type, topic, emotion,
                        weight, created_at, embedding, digested, user_msg, assistant_msg
                 FROM turns
                 WHERE user_id = ?1 AND channel = ?2 AND round_number BETWEEN ?3 AND ?4
                 ORDER BY round_number ASC",
            )?;
            let rows = stmt.query_map(rusqlite::params![user_id, channel, start, end], row_to_turn)?;
            Ok(rows.filter_map(|r| r.ok()).collect())
        })
        .await
    }

    /// Turns whose embedding is still null, oldest first, for the
    /// embedding backfill / retry path.
    pub async fn get_unembedded(&self, limit: usize) -> StoreResult<Vec<Turn>> {
        self.run_blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, channel, round_number, scene_type, topic, emotion,
                        weight, created_at, embedding, digested, user_msg, assistant_msg
                 FROM turns WHERE embedding IS NULL
                 ORDER BY created_at ASC LIMIT ?1",
            )?;
            let rows = stmt.query_map(rusqlite::params![limit as i64], row_to_turn)?;
            Ok(rows.filter_map(|r| r.ok()).collect())
        })
        .await
    }

    pub async fn insert_summary(&self, summary: NewSummary) -> StoreResult<i64> {
        self.run_blocking(move |conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO summaries
                 (user_id, channel, start_round, end_round, text, scene_type, created_at, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL)",
                rusqlite::params![
                    summary.user_id,
                    summary.channel,
                    summary.start_round,
                    summary.end_round,
                    summary.text,
                    summary.scene_type.as_str(),
                    now,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn get_recent_summaries(
        &self,
        user_id: &str,
        channel: &str,
        limit: usize,
    ) -> StoreResult<Vec<Summary>> {
        let user_id = user_id.to_string();
        let channel = channel.to_string();
        self.run_blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, channel, start_round, end_round, text, scene_type,
                        created_at, embedding
                 FROM summaries WHERE user_id = ?1 AND channel = ?2
                 ORDER BY end_round DESC LIMIT ?3",
            )?;
            let rows = stmt.query_map(rusqlite::params![user_id, channel, limit as i64], row_to_summary)?;
            let mut out: Vec<Summary> = rows.filter_map(|r| r.ok()).collect();
            out.reverse();
            Ok(out)
        })
        .await
    }

    /// `0` if this (user, channel) has no summaries yet.
    pub async fn get_last_summarized_round(&self, user_id: &str, channel: &str) -> StoreResult<i64> {
        let user_id = user_id.to_string();
        let channel = channel.to_string();
        self.run_blocking(move |conn| {
            let end: Option<i64> = conn
                .query_row(
                    "SELECT MAX(end_round) FROM summaries WHERE user_id = ?1 AND channel = ?2",
                    rusqlite::params![user_id, channel],
                    |row| row.get(0),
                )
                .unwrap_or(None);
            Ok(end.unwrap_or(0))
        })
        .await
    }

    /// Read-modify-write increment, best-effort (§4.1 citation tracking).
    pub async fn increment_weight(&self, turn_id: i64) -> StoreResult<()> {
        self.run_blocking(move |conn| {
            conn.execute(
                "UPDATE turns SET weight = weight + 1 WHERE id = ?1",
                rusqlite::params![turn_id],
            )?;
            Ok(())
        })
        .await
    }

    /// Recent turns sharing the same `emotion` tag, within the last `days`
    /// days, used by the auto-inject engine's `emotion` rule (§4.8).
    pub async fn get_recent_by_emotion(
        &self,
        channel: &str,
        emotion: &str,
        days: u32,
        limit: usize,
    ) -> StoreResult<Vec<Turn>> {
        let channel = channel.to_string();
        let emotion = emotion.to_string();
        self.run_blocking(move |conn| {
            let cutoff = (Utc::now() - chrono::Duration::days(days as i64)).to_rfc3339();
            let mut stmt = conn.prepare(
                "SELECT id, user_id, channel, round_number, scene_type, topic, emotion,
                        weight, created_at, embedding, digested, user_msg, assistant_msg
                 FROM turns
                 WHERE channel = ?1 AND emotion = ?2 AND created_at >= ?3
                 ORDER BY created_at DESC LIMIT ?4",
            )?;
            let rows = stmt.query_map(
                rusqlite::params![channel, emotion, cutoff, limit as i64],
                row_to_turn,
            )?;
            Ok(rows.filter_map(|r| r.ok()).collect())
        })
        .await
    }

    pub async fn update_embedding(&self, kind: RowKind, id: i64, embedding: &[f32]) -> StoreResult<()> {
        let json = serde_json::to_string(embedding)?;
        self.run_blocking(move |conn| {
            let table = match kind {
                RowKind::Turn => "turns",
                RowKind::Summary => "summaries",
            };
            conn.execute(
                &format!("UPDATE {table} SET embedding = ?1 WHERE id = ?2"),
                rusqlite::params![json, id],
            )?;
            Ok(())
        })
        .await
    }

    /// Case-insensitive substring match on `(user_msg OR assistant_msg)` in
    /// turns and on `text` in summaries, filtered by channel and scene
    /// (`scene=daily` accepts `daily`+`plot`; `scene=plot` restricts to
    /// `plot`; any other scene matches only itself) (§4.6).
    pub async fn fuzzy_search(
        &self,
        term: &str,
        channel: &str,
        scene: SceneType,
        turn_limit: usize,
        summary_limit: usize,
    ) -> StoreResult<FuzzyHits> {
        let term = term.to_string();
        let channel = channel.to_string();
        self.run_blocking(move |conn| {
            let pattern = format!("%{term}%");
            let scene_clause = match scene {
                SceneType::Daily => "AND scene_type IN ('daily','plot')",
                SceneType::Plot => "AND scene_type = 'plot'",
                SceneType::Meta => "AND scene_type = 'meta'",
            };

            let turn_sql = format!(
                "SELECT id, user_id, channel, round_number, scene_type, topic, emotion,
                        weight, created_at, embedding, digested, user_msg, assistant_msg
                 FROM turns
                 WHERE channel = ?1 {scene_clause}
                   AND (user_msg LIKE ?2 ESCAPE '\\' OR assistant_msg LIKE ?2 ESCAPE '\\')
                 ORDER BY created_at DESC LIMIT ?3"
            );
            let mut stmt = conn.prepare(&turn_sql)?;
            let turns: Vec<Turn> = stmt
                .query_map(rusqlite::params![channel, pattern, turn_limit as i64], row_to_turn)?
                .filter_map(|r| r.ok())
                .collect();

            let sum_sql = format!(
                "SELECT id, user_id, channel, start_round, end_round, text, scene_type,
                        created_at, embedding
                 FROM summaries
                 WHERE channel = ?1 {scene_clause} AND text LIKE ?2 ESCAPE '\\'
                 ORDER BY created_at DESC LIMIT ?3"
            );
            let mut stmt = conn.prepare(&sum_sql)?;
            let summaries: Vec<Summary> = stmt
                .query_map(
                    rusqlite::params![channel, pattern, summary_limit as i64],
                    row_to_summary,
                )?
                .filter_map(|r| r.ok())
                .collect();

            Ok(FuzzyHits { turns, summaries })
        })
        .await
    }

    /// Fetches the newest `limit` rows (turns, then summaries) carrying a
    /// non-null embedding for the given channel+scene filter — the
    /// application-side fallback path used when no stored vector-search
    /// procedure is available (always the case for the local store, §4.5).
    pub async fn get_embedded_candidates(
        &self,
        channel: &str,
        scene: SceneType,
        turn_limit: usize,
        summary_limit: usize,
    ) -> StoreResult<(Vec<Turn>, Vec<Summary>)> {
        let channel = channel.to_string();
        self.run_blocking(move |conn| {
            let scene_clause = match scene {
                SceneType::Daily => "AND scene_type IN ('daily','plot')",
                SceneType::Plot => "AND scene_type = 'plot'",
                SceneType::Meta => "AND scene_type = 'meta'",
            };
            let turn_sql = format!(
                "SELECT id, user_id, channel, round_number, scene_type, topic, emotion,
                        weight, created_at, embedding, digested, user_msg, assistant_msg
                 FROM turns WHERE channel = ?1 {scene_clause} AND embedding IS NOT NULL
                 ORDER BY created_at DESC LIMIT ?2"
            );
            let mut stmt = conn.prepare(&turn_sql)?;
            let turns: Vec<Turn> = stmt
                .query_map(rusqlite::params![channel, turn_limit as i64], row_to_turn)?
                .filter_map(|r| r.ok())
                .collect();

            let sum_sql = format!(
                "SELECT id, user_id, channel, start_round, end_round, text, scene_type,
                        created_at, embedding
                 FROM summaries WHERE channel = ?1 {scene_clause} AND embedding IS NOT NULL
                 ORDER BY created_at DESC LIMIT ?2"
            );
            let mut stmt = conn.prepare(&sum_sql)?;
            let summaries: Vec<Summary> = stmt
                .query_map(rusqlite::params![channel, summary_limit as i64], row_to_summary)?
                .filter_map(|r| r.ok())
                .collect();

            Ok((turns, summaries))
        })
        .await
    }

    /// Evicts (nulls out) turn-level embeddings older than `days` days.
    /// Summaries are never evicted (§4.7 point 6). Returns the row count
    /// touched.
    pub async fn evict_stale_turn_embeddings(&self, days: u32) -> StoreResult<usize> {
        self.run_blocking(move |conn| {
            let cutoff = (Utc::now() - chrono::Duration::days(days as i64)).to_rfc3339();
            let n = conn.execute(
                "UPDATE turns SET embedding = NULL WHERE embedding IS NOT NULL AND created_at < ?1",
                rusqlite::params![cutoff],
            )?;
            Ok(n)
        })
        .await
    }

    /// Number of diary rows already recorded for `user_id` on `day`, used
    /// by the `save_diary` tool to enforce its two-per-day cap (§4.9,
    /// §9A). The count-then-insert is racy under concurrent callers,
    /// matching the documented best-effort tolerance elsewhere in the
    /// store.
    pub async fn count_diaries_on_day(&self, user_id: &str, day: &str) -> StoreResult<i64> {
        let user_id = user_id.to_string();
        let day = day.to_string();
        self.run_blocking(move |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM diaries WHERE user_id = ?1 AND day = ?2",
                rusqlite::params![user_id, day],
                |row| row.get(0),
            )
            .map_err(StoreError::from)
        })
        .await
    }

    pub async fn insert_diary(
        &self,
        user_id: &str,
        day: &str,
        content: &str,
        mood: Option<&str>,
    ) -> StoreResult<i64> {
        let user_id = user_id.to_string();
        let day = day.to_string();
        let content = content.to_string();
        let mood = mood.map(str::to_string);
        self.run_blocking(move |conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO diaries (user_id, day, content, mood, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![user_id, day, content, mood, now],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn list_diaries(&self, user_id: &str, limit: usize) -> StoreResult<Vec<DiaryEntry>> {
        let user_id = user_id.to_string();
        self.run_blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, day, content, mood, created_at FROM diaries
                 WHERE user_id = ?1 ORDER BY created_at DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(rusqlite::params![user_id, limit as i64], |row| {
                Ok(DiaryEntry {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    day: row.get(2)?,
                    content: row.get(3)?,
                    mood: row.get(4)?,
                    created_at: parse_dt(row.get::<_, String>(5)?),
                })
            })?;
            Ok(rows.filter_map(|r| r.ok()).collect())
        })
        .await
    }

    /// Generic update of an auxiliary record by kind+id+field map, used by
    /// the `update` tool. `kind` must be one of [`AUX_KINDS`]; any other
    /// value is rejected before touching the database.
    pub async fn update_record(&self, kind: &str, id: i64, fields: &Value) -> StoreResult<()> {
        if !AUX_KINDS.contains(&kind) {
            return Err(StoreError::UnknownKind(kind.to_string()));
        }
        let table = match kind {
            "expense" => "expenses",
            "diary" => "diaries",
            "promise" => "promises",
            "wishlist" => "wishlists",
            "milestone" => "milestones",
            "chat_memory" => "chat_memories",
            other => return Err(StoreError::UnknownKind(other.to_string())),
        };
        let object = fields
            .as_object()
            .ok_or_else(|| StoreError::UnknownKind("fields must be a JSON object".to_string()))?;
        if object.is_empty() {
            return Ok(());
        }

        let mut assignments = Vec::new();
        let mut values: Vec<rusqlite::types::Value> = Vec::new();
        for (key, value) in object {
            if !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                warn!(key, "skipping field with unsafe name in update_record");
                continue;
            }
            assignments.push(format!("{key} = ?"));
            values.push(json_to_sql(value));
        }
        if assignments.is_empty() {
            return Ok(());
        }
        values.push(rusqlite::types::Value::Integer(id));

        self.run_blocking(move |conn| {
            let sql = format!(
                "UPDATE {table} SET {} WHERE id = ?",
                assignments.join(", ")
            );
            let params: Vec<&dyn rusqlite::ToSql> =
                values.iter().map(|v| v as &dyn rusqlite::ToSql).collect();
            let n = conn.execute(&sql, params.as_slice())?;
            if n == 0 {
                return Err(StoreError::NotFound {
                    kind: table.to_string(),
                    id,
                });
            }
            Ok(())
        })
        .await
    }
}

fn json_to_sql(value: &Value) -> rusqlite::types::Value {
    match value {
        Value::Null => rusqlite::types::Value::Null,
        Value::Bool(b) => rusqlite::types::Value::Integer(*b as i64),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                rusqlite::types::Value::Integer(i)
            } else {
                rusqlite::types::Value::Real(n.as_f64().unwrap_or_default())
            }
        }
        Value::String(s) => rusqlite::types::Value::Text(s.clone()),
        other => rusqlite::types::Value::Text(other.to_string()),
    }
}

fn parse_dt(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_turn(row: &rusqlite::Row<'_>) -> rusqlite::Result<Turn> {
    let scene_str: String = row.get(4)?;
    let embedding_json: Option<String> = row.get(9)?;
    Ok(Turn {
        id: row.get(0)?,
        user_id: row.get(1)?,
        channel: row.get(2)?,
        round_number: row.get(3)?,
        scene_type: scene_str.parse().unwrap_or(SceneType::Daily),
        topic: row.get(5)?,
        emotion: row.get(6)?,
        weight: row.get(7)?,
        created_at: parse_dt(row.get(8)?),
        embedding: embedding_json.and_then(|s| serde_json::from_str(&s).ok()),
        digested: row.get::<_, i64>(10)? != 0,
        user_msg: row.get(11)?,
        assistant_msg: row.get(12)?,
    })
}

fn row_to_summary(row: &rusqlite::Row<'_>) -> rusqlite::Result<Summary> {
    let scene_str: String = row.get(6)?;
    let embedding_json: Option<String> = row.get(8)?;
    Ok(Summary {
        id: row.get(0)?,
        user_id: row.get(1)?,
        channel: row.get(2)?,
        start_round: row.get(3)?,
        end_round: row.get(4)?,
        text: row.get(5)?,
        scene_type: scene_str.parse().unwrap_or(SceneType::Daily),
        created_at: parse_dt(row.get(7)?),
        embedding: embedding_json.and_then(|s| serde_json::from_str(&s).ok()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_message_filter_rejects_markers() {
        assert!(is_system_message(""));
        assert!(is_system_message("a"));
        assert!(is_system_message("Please summarize this conversation"));
        assert!(is_system_message("You are a helpful assistant"));
        assert!(!is_system_message("what's the weather like today"));
    }

    #[tokio::test]
    async fn insert_and_fetch_turn_roundtrip() {
        let conn = Connection::open_in_memory().unwrap();
        let store = Store::new(conn).unwrap();
        let id = store
            .insert_turn(NewTurn {
                user_id: "u1".into(),
                channel: "claude".into(),
                scene_type: SceneType::Daily,
                topic: None,
                emotion: None,
                user_msg: "hello there".into(),
                assistant_msg: "hi, how can I help?".into(),
            })
            .await
            .unwrap();
        assert!(id.is_some());

        let recent = store.get_recent_turns("u1", "claude", 10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].round_number, 1);
    }

    #[tokio::test]
    async fn filtered_turn_is_not_persisted() {
        let conn = Connection::open_in_memory().unwrap();
        let store = Store::new(conn).unwrap();
        let id = store
            .insert_turn(NewTurn {
                user_id: "u1".into(),
                channel: "claude".into(),
                scene_type: SceneType::Daily,
                topic: None,
                emotion: None,
                user_msg: "summarize this please".into(),
                assistant_msg: "ok".into(),
            })
            .await
            .unwrap();
        assert!(id.is_none());
    }

    #[tokio::test]
    async fn fuzzy_search_matches_substring_case_insensitively() {
        let conn = Connection::open_in_memory().unwrap();
        let store = Store::new(conn).unwrap();
        store
            .insert_turn(NewTurn {
                user_id: "u1".into(),
                channel: "claude".into(),
                scene_type: SceneType::Plot,
                topic: None,
                emotion: None,
                user_msg: "tell me about Dragons".into(),
                assistant_msg: "dragons are mythical creatures".into(),
            })
            .await
            .unwrap();

        let hits = store
            .fuzzy_search("dragon", "claude", SceneType::Plot, 10, 10)
            .await
            .unwrap();
        assert_eq!(hits.turns.len(), 1);
    }
}
