use rusqlite::{Connection, Result};

/// Initialise all tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    create_turns_table(conn)?;
    create_summaries_table(conn)?;
    create_aux_tables(conn)?;
    Ok(())
}

fn create_turns_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS turns (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id       TEXT NOT NULL,
            channel       TEXT NOT NULL,
            round_number  INTEGER NOT NULL,
            scene_type    TEXT NOT NULL,
            topic         TEXT,
            emotion       TEXT,
            weight        INTEGER NOT NULL DEFAULT 0,
            created_at    TEXT NOT NULL,
            embedding     TEXT,
            digested      INTEGER NOT NULL DEFAULT 0,
            user_msg      TEXT NOT NULL,
            assistant_msg TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_turns_user_channel
            ON turns(user_id, channel, round_number);
        CREATE INDEX IF NOT EXISTS idx_turns_created
            ON turns(created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_turns_unembedded
            ON turns(embedding) WHERE embedding IS NULL;",
    )
}

fn create_summaries_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS summaries (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id      TEXT NOT NULL,
            channel      TEXT NOT NULL,
            start_round  INTEGER NOT NULL,
            end_round    INTEGER NOT NULL,
            text         TEXT NOT NULL,
            scene_type   TEXT NOT NULL,
            created_at   TEXT NOT NULL,
            embedding    TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_summaries_user_channel
            ON summaries(user_id, channel, end_round DESC);",
    )
}

/// Auxiliary record tables: expense/diary/promise/wishlist/milestone/
/// chat_memory. These are independent leaves sharing the store (§3) and
/// are addressed generically by the `update_record` tool operation.
fn create_aux_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS diaries (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id    TEXT NOT NULL,
            day        TEXT NOT NULL,
            content    TEXT NOT NULL,
            mood       TEXT,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_diaries_user_day
            ON diaries(user_id, day);
        CREATE TABLE IF NOT EXISTS expenses (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id    TEXT NOT NULL,
            amount     REAL NOT NULL,
            category   TEXT,
            note       TEXT,
            created_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS promises (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id    TEXT NOT NULL,
            content    TEXT NOT NULL,
            status     TEXT NOT NULL DEFAULT 'open',
            due_at     TEXT,
            created_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS wishlists (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id    TEXT NOT NULL,
            item       TEXT NOT NULL,
            status     TEXT NOT NULL DEFAULT 'open',
            created_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS milestones (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id    TEXT NOT NULL,
            title      TEXT NOT NULL,
            occurred_on TEXT,
            created_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS chat_memories (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id    TEXT NOT NULL,
            category   TEXT NOT NULL,
            key        TEXT NOT NULL,
            value      TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(user_id, category, key)
        );",
    )
}
