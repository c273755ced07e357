//! Append-only log with consumer groups.
//!
//! A group keeps one cursor; every entry read through the group is recorded
//! against the reading consumer until it is acknowledged. Entries that a
//! consumer read but never acknowledged are handed back to it by
//! [`StreamLog::read_pending`], which is how work survives a restart.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, info, instrument, warn};
use turnstile_core::now_millis;

use crate::db::init_db;
use crate::error::{Result, StreamError};
use crate::types::{EntryId, Fields, StartFrom, StreamEntry};

#[async_trait]
pub trait StreamLog: Send + Sync {
    /// Append an entry, then trim the stream to its newest `max_len` entries.
    async fn append(&self, stream: &str, fields: &Fields, max_len: Option<usize>) -> Result<EntryId>;

    /// Create the group if it does not exist. Returns true when created.
    async fn ensure_group(&self, stream: &str, group: &str, start: StartFrom) -> Result<bool>;

    /// Move an existing group's cursor. Unacknowledged entries stay pending.
    async fn reset_group(&self, stream: &str, group: &str, start: StartFrom) -> Result<()>;

    /// Hand out up to `count` never-delivered entries and record them as
    /// pending for `consumer`.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>>;

    /// Re-deliver `consumer`'s unacknowledged entries with id above `after`.
    async fn read_pending(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        after: EntryId,
        count: usize,
    ) -> Result<Vec<StreamEntry>>;

    /// Take over entries that other consumers of the group read but have not
    /// acknowledged for at least `min_idle`. Claimed entries become pending
    /// for `consumer` and are returned oldest first.
    async fn claim_stale(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamEntry>>;

    /// Acknowledge entries. Returns how many were still pending.
    async fn ack(&self, stream: &str, group: &str, ids: &[EntryId]) -> Result<usize>;

    async fn pending_count(&self, stream: &str, group: &str) -> Result<usize>;

    /// Newest entries, newest first.
    async fn latest(&self, stream: &str, count: usize) -> Result<Vec<StreamEntry>>;
}

/// [`StreamLog`] on SQLite. One connection per instance; several instances
/// may share a database file.
pub struct SqliteStreamLog {
    conn: Mutex<Connection>,
}

impl SqliteStreamLog {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StreamError::Poisoned)
    }

    fn append_sync(&self, stream: &str, fields: &Fields, max_len: Option<usize>) -> Result<EntryId> {
        let json = serde_json::to_string(fields)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO stream_entries (stream, created_at, fields) VALUES (?1, ?2, ?3)",
            params![stream, now_millis(), json],
        )?;
        let id = tx.last_insert_rowid() as EntryId;

        if let Some(max_len) = max_len {
            let trimmed = tx.execute(
                "DELETE FROM stream_entries
                 WHERE stream = ?1 AND id <= (
                     SELECT id FROM stream_entries WHERE stream = ?1
                     ORDER BY id DESC LIMIT 1 OFFSET ?2
                 )",
                params![stream, max_len as i64],
            )?;
            if trimmed > 0 {
                debug!(%stream, trimmed, "stream trimmed");
            }
        }
        tx.commit()?;
        Ok(id)
    }

    fn start_id(conn: &Connection, stream: &str, start: StartFrom) -> Result<i64> {
        Ok(match start {
            StartFrom::Beginning => 0,
            StartFrom::Latest => conn.query_row(
                "SELECT COALESCE(MAX(id), 0) FROM stream_entries WHERE stream = ?1",
                [stream],
                |row| row.get(0),
            )?,
        })
    }

    fn ensure_group_sync(&self, stream: &str, group: &str, start: StartFrom) -> Result<bool> {
        let conn = self.conn()?;
        let cursor = Self::start_id(&conn, stream, start)?;
        let created = conn.execute(
            "INSERT OR IGNORE INTO stream_groups (stream, group_name, last_delivered, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![stream, group, cursor, now_millis()],
        )?;
        if created == 1 {
            info!(%stream, %group, cursor, "consumer group created");
        }
        Ok(created == 1)
    }

    fn reset_group_sync(&self, stream: &str, group: &str, start: StartFrom) -> Result<()> {
        let conn = self.conn()?;
        let cursor = Self::start_id(&conn, stream, start)?;
        let n = conn.execute(
            "UPDATE stream_groups SET last_delivered = ?3 WHERE stream = ?1 AND group_name = ?2",
            params![stream, group, cursor],
        )?;
        if n == 0 {
            return Err(no_group(stream, group));
        }
        info!(%stream, %group, cursor, "consumer group cursor reset");
        Ok(())
    }

    fn read_group_sync(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let cursor: i64 = tx
            .query_row(
                "SELECT last_delivered FROM stream_groups WHERE stream = ?1 AND group_name = ?2",
                params![stream, group],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| no_group(stream, group))?;

        let rows: Vec<(i64, i64, String)> = {
            let mut stmt = tx.prepare_cached(
                "SELECT id, created_at, fields FROM stream_entries
                 WHERE stream = ?1 AND id > ?2 ORDER BY id LIMIT ?3",
            )?;
            let rows = stmt
                .query_map(params![stream, cursor, count as i64], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?
                .collect::<rusqlite::Result<_>>()?;
            rows
        };

        let Some(&(last, _, _)) = rows.last() else {
            return Ok(Vec::new());
        };

        let now = now_millis();
        for (id, _, _) in &rows {
            tx.execute(
                "INSERT INTO stream_pending
                     (stream, group_name, entry_id, consumer, delivered_at, delivery_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1)
                 ON CONFLICT (stream, group_name, entry_id) DO UPDATE SET
                     consumer = excluded.consumer,
                     delivered_at = excluded.delivered_at,
                     delivery_count = delivery_count + 1",
                params![stream, group, id, consumer, now],
            )?;
        }
        tx.execute(
            "UPDATE stream_groups SET last_delivered = ?3 WHERE stream = ?1 AND group_name = ?2",
            params![stream, group, last],
        )?;
        tx.commit()?;

        Ok(rows.into_iter().map(decode_row).collect())
    }

    fn read_pending_sync(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        after: EntryId,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        // Pending rows whose entry was trimmed away can never be delivered.
        let orphans = tx.execute(
            "DELETE FROM stream_pending
             WHERE stream = ?1 AND group_name = ?2 AND consumer = ?3
               AND entry_id NOT IN (SELECT id FROM stream_entries WHERE stream = ?1)",
            params![stream, group, consumer],
        )?;
        if orphans > 0 {
            debug!(%stream, %group, %consumer, orphans, "dropped pending entries lost to trim");
        }

        let rows: Vec<(i64, i64, String)> = {
            let mut stmt = tx.prepare_cached(
                "SELECT e.id, e.created_at, e.fields
                 FROM stream_pending p
                 JOIN stream_entries e ON e.id = p.entry_id
                 WHERE p.stream = ?1 AND p.group_name = ?2 AND p.consumer = ?3 AND p.entry_id > ?4
                 ORDER BY p.entry_id LIMIT ?5",
            )?;
            let rows = stmt
                .query_map(
                    params![stream, group, consumer, after as i64, count as i64],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )?
                .collect::<rusqlite::Result<_>>()?;
            rows
        };

        let now = now_millis();
        for (id, _, _) in &rows {
            tx.execute(
                "UPDATE stream_pending SET delivered_at = ?4, delivery_count = delivery_count + 1
                 WHERE stream = ?1 AND group_name = ?2 AND entry_id = ?3",
                params![stream, group, id, now],
            )?;
        }
        tx.commit()?;

        Ok(rows.into_iter().map(decode_row).collect())
    }

    fn claim_stale_sync(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        let now = now_millis();
        let idle_before = now - min_idle.as_millis() as i64;
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let rows: Vec<(i64, i64, String, String)> = {
            let mut stmt = tx.prepare_cached(
                "SELECT e.id, e.created_at, e.fields, p.consumer
                 FROM stream_pending p
                 JOIN stream_entries e ON e.id = p.entry_id
                 WHERE p.stream = ?1 AND p.group_name = ?2 AND p.consumer <> ?3
                   AND p.delivered_at <= ?4
                 ORDER BY p.entry_id LIMIT ?5",
            )?;
            let rows = stmt
                .query_map(
                    params![stream, group, consumer, idle_before, count as i64],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )?
                .collect::<rusqlite::Result<_>>()?;
            rows
        };

        for (id, _, _, previous) in &rows {
            tx.execute(
                "UPDATE stream_pending
                 SET consumer = ?4, delivered_at = ?5, delivery_count = delivery_count + 1
                 WHERE stream = ?1 AND group_name = ?2 AND entry_id = ?3",
                params![stream, group, id, consumer, now],
            )?;
            debug!(%stream, %group, entry = id, from = %previous, to = %consumer, "pending entry claimed");
        }
        tx.commit()?;

        Ok(rows
            .into_iter()
            .map(|(id, created_at, fields, _)| decode_row((id, created_at, fields)))
            .collect())
    }

    fn ack_sync(&self, stream: &str, group: &str, ids: &[EntryId]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut acked = 0;
        {
            let mut stmt = tx.prepare_cached(
                "DELETE FROM stream_pending WHERE stream = ?1 AND group_name = ?2 AND entry_id = ?3",
            )?;
            for id in ids {
                acked += stmt.execute(params![stream, group, *id as i64])?;
            }
        }
        tx.commit()?;
        Ok(acked)
    }

    fn pending_count_sync(&self, stream: &str, group: &str) -> Result<usize> {
        let conn = self.conn()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM stream_pending WHERE stream = ?1 AND group_name = ?2",
            params![stream, group],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    fn latest_sync(&self, stream: &str, count: usize) -> Result<Vec<StreamEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT id, created_at, fields FROM stream_entries
             WHERE stream = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows: Vec<(i64, i64, String)> = stmt
            .query_map(params![stream, count as i64], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<rusqlite::Result<_>>()?;
        Ok(rows.into_iter().map(decode_row).collect())
    }

    #[cfg(test)]
    pub(crate) fn insert_raw(&self, stream: &str, fields_json: &str) -> EntryId {
        let conn = self.conn().unwrap();
        conn.execute(
            "INSERT INTO stream_entries (stream, created_at, fields) VALUES (?1, ?2, ?3)",
            params![stream, now_millis(), fields_json],
        )
        .unwrap();
        conn.last_insert_rowid() as EntryId
    }
}

fn no_group(stream: &str, group: &str) -> StreamError {
    StreamError::NoGroup {
        stream: stream.to_string(),
        group: group.to_string(),
    }
}

/// An entry whose fields cannot be read comes back with no fields, so the
/// handler rejects it as malformed and it is acknowledged like any other.
fn decode_row((id, created_at_ms, json): (i64, i64, String)) -> StreamEntry {
    let fields = serde_json::from_str(&json).unwrap_or_else(|e| {
        warn!(entry = id, error = %e, "unreadable entry fields");
        Fields::new()
    });
    StreamEntry {
        id: id as EntryId,
        created_at_ms,
        fields,
    }
}

#[async_trait]
impl StreamLog for SqliteStreamLog {
    #[instrument(skip(self, fields))]
    async fn append(&self, stream: &str, fields: &Fields, max_len: Option<usize>) -> Result<EntryId> {
        self.append_sync(stream, fields, max_len)
    }

    async fn ensure_group(&self, stream: &str, group: &str, start: StartFrom) -> Result<bool> {
        self.ensure_group_sync(stream, group, start)
    }

    async fn reset_group(&self, stream: &str, group: &str, start: StartFrom) -> Result<()> {
        self.reset_group_sync(stream, group, start)
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        self.read_group_sync(stream, group, consumer, count)
    }

    async fn read_pending(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        after: EntryId,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        self.read_pending_sync(stream, group, consumer, after, count)
    }

    async fn claim_stale(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        self.claim_stale_sync(stream, group, consumer, min_idle, count)
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[EntryId]) -> Result<usize> {
        self.ack_sync(stream, group, ids)
    }

    async fn pending_count(&self, stream: &str, group: &str) -> Result<usize> {
        self.pending_count_sync(stream, group)
    }

    async fn latest(&self, stream: &str, count: usize) -> Result<Vec<StreamEntry>> {
        self.latest_sync(stream, count)
    }
}
