use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("row not found: {kind} {id}")]
    NotFound { kind: String, id: i64 },

    #[error("unknown record kind: {0}")]
    UnknownKind(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("blocking task panicked: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, StoreError>;
pub type StoreResult<T> = Result<T>;
