use chrono::{DateTime, Utc};
use memgate_core::types::SceneType;
use serde::{Deserialize, Serialize};

/// One atomic (user_message, assistant_message) pair. See data model §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub id: i64,
    pub user_id: String,
    pub channel: String,
    pub round_number: i64,
    pub scene_type: SceneType,
    pub topic: Option<String>,
    pub emotion: Option<String>,
    pub weight: i64,
    pub created_at: DateTime<Utc>,
    /// Null until the embedding task runs; may stay null forever on failure.
    pub embedding: Option<Vec<f32>>,
    pub digested: bool,
    pub user_msg: String,
    pub assistant_msg: String,
}

/// Fields required to persist a new turn. `round_number` is assigned by
/// the store at insert time via [`crate::manager::Store::next_round`].
#[derive(Debug, Clone)]
pub struct NewTurn {
    pub user_id: String,
    pub channel: String,
    pub scene_type: SceneType,
    pub topic: Option<String>,
    pub emotion: Option<String>,
    pub user_msg: String,
    pub assistant_msg: String,
}

/// A digested window of `N` contiguous rounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub id: i64,
    pub user_id: String,
    pub channel: String,
    pub start_round: i64,
    pub end_round: i64,
    pub text: String,
    pub scene_type: SceneType,
    pub created_at: DateTime<Utc>,
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone)]
pub struct NewSummary {
    pub user_id: String,
    pub channel: String,
    pub start_round: i64,
    pub end_round: i64,
    pub text: String,
    pub scene_type: SceneType,
}

/// Which table an embedding or fuzzy-search result belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    Turn,
    Summary,
}

/// A diary entry, write-through to the notes publishing service by the
/// tool layer. The store only owns the local copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiaryEntry {
    pub id: i64,
    pub user_id: String,
    /// Calendar day this entry belongs to, `YYYY-MM-DD` in the user's local
    /// time zone (enforced by the caller, not the store).
    pub day: String,
    pub content: String,
    pub mood: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Results of the keyword arm of hybrid retrieval: turns and summaries
/// whose text contains the searched term.
#[derive(Debug, Clone, Default)]
pub struct FuzzyHits {
    pub turns: Vec<Turn>,
    pub summaries: Vec<Summary>,
}

/// The fixed set of auxiliary record kinds the generic `update_record`
/// tool operation is allowed to touch. Anything else is an unknown kind.
pub const AUX_KINDS: &[&str] = &[
    "expense",
    "diary",
    "promise",
    "wishlist",
    "milestone",
    "chat_memory",
];
