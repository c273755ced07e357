use std::time::Duration;

use rusqlite::Connection;

use crate::error::Result;

/// How long a writer waits on another process's transaction before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open `path` with the pragmas every turnstile connection needs.
///
/// WAL lets readers in other processes proceed while one process writes.
pub fn open(path: &str) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
    Ok(conn)
}

/// Initialise the lock, flag and pending-queue tables.
///
/// Safe to call on every startup - uses `IF NOT EXISTS` throughout.
/// All timestamps are Unix epoch milliseconds.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS session_locks (
            session_id   TEXT    PRIMARY KEY,
            holder_token TEXT    NOT NULL,
            holder_name  TEXT    NOT NULL,
            expires_at   INTEGER NOT NULL
        ) STRICT;

        CREATE TABLE IF NOT EXISTS processing_flags (
            session_id   TEXT    PRIMARY KEY,
            active_since INTEGER NOT NULL,
            expires_at   INTEGER NOT NULL
        ) STRICT;

        -- One row per non-empty queue; carries the whole queue's TTL.
        CREATE TABLE IF NOT EXISTS pending_queues (
            session_id TEXT    PRIMARY KEY,
            expires_at INTEGER NOT NULL
        ) STRICT;

        CREATE TABLE IF NOT EXISTS pending_messages (
            seq        INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT    NOT NULL,
            user_id    TEXT    NOT NULL,
            payload    TEXT    NOT NULL,   -- JSON-encoded PendingMessage
            UNIQUE (session_id, user_id)
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_pending_session
            ON pending_messages (session_id, seq);",
    )?;
    Ok(())
}
