use rusqlite::Connection;

use crate::error::Result;

/// Initialise the stream schema in `conn`.
///
/// Entry ids come from one AUTOINCREMENT sequence shared by every stream, so
/// they are strictly increasing within a stream and never reused after a trim.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS stream_entries (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            stream     TEXT    NOT NULL,
            created_at INTEGER NOT NULL,   -- Unix ms
            fields     TEXT    NOT NULL    -- JSON object of string fields
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_stream_entries_stream ON stream_entries (stream, id);

        -- One cursor per consumer group: the last entry handed out.
        CREATE TABLE IF NOT EXISTS stream_groups (
            stream         TEXT    NOT NULL,
            group_name     TEXT    NOT NULL,
            last_delivered INTEGER NOT NULL,
            created_at     INTEGER NOT NULL,
            PRIMARY KEY (stream, group_name)
        ) STRICT;

        -- Delivered but not yet acknowledged.
        CREATE TABLE IF NOT EXISTS stream_pending (
            stream         TEXT    NOT NULL,
            group_name     TEXT    NOT NULL,
            entry_id       INTEGER NOT NULL,
            consumer       TEXT    NOT NULL,
            delivered_at   INTEGER NOT NULL,
            delivery_count INTEGER NOT NULL DEFAULT 1,
            PRIMARY KEY (stream, group_name, entry_id)
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_stream_pending_consumer
            ON stream_pending (stream, group_name, consumer, entry_id);
        ",
    )?;
    Ok(())
}
