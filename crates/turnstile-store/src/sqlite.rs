use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use tracing::{debug, instrument, warn};
use turnstile_core::{now_millis, DequeueResult, EnqueueResult, PendingMessage, SessionId};

use crate::db;
use crate::error::{Result, StoreError};
use crate::flag::ProcessingFlagStore;
use crate::lock::LockStore;
use crate::queue::{PendingQueueStore, QueueLimits};

/// SQLite-backed lock, flag and queue store.
///
/// Each instance owns one connection. Several instances (in one process or
/// many) may point at the same database file; every mutation is a single
/// statement or an IMMEDIATE transaction, so they never interleave.
pub struct SqliteStore {
    db: Mutex<Connection>,
    limits: QueueLimits,
    flag_ttl: Duration,
}

impl SqliteStore {
    /// Wrap an already-open connection, creating the schema if needed.
    pub fn new(conn: Connection, limits: QueueLimits, flag_ttl: Duration) -> Result<Self> {
        db::init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
            limits,
            flag_ttl,
        })
    }

    /// Open (or create) the database file at `path`.
    pub fn open(path: &str, limits: QueueLimits, flag_ttl: Duration) -> Result<Self> {
        Self::new(db::open(path)?, limits, flag_ttl)
    }

    pub fn limits(&self) -> QueueLimits {
        self.limits
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|_| StoreError::Poisoned)
    }

    // --- lock ---------------------------------------------------------------

    fn acquire_sync(&self, session: &str, token: &str, holder: &str, lease: Duration) -> Result<bool> {
        let now = now_millis();
        let expires = now + lease.as_millis() as i64;
        let db = self.conn()?;
        // Insert, or overwrite only a lapsed lease. A live lease leaves the
        // row untouched and reports zero changes.
        let changed = db.execute(
            "INSERT INTO session_locks (session_id, holder_token, holder_name, expires_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(session_id) DO UPDATE SET
                 holder_token = excluded.holder_token,
                 holder_name  = excluded.holder_name,
                 expires_at   = excluded.expires_at
             WHERE session_locks.expires_at <= ?5",
            params![session, token, holder, expires, now],
        )?;
        Ok(changed == 1)
    }

    fn renew_sync(&self, session: &str, token: &str, lease: Duration) -> Result<bool> {
        let expires = now_millis() + lease.as_millis() as i64;
        let db = self.conn()?;
        let changed = db.execute(
            "UPDATE session_locks SET expires_at = ?3
             WHERE session_id = ?1 AND holder_token = ?2",
            params![session, token, expires],
        )?;
        Ok(changed == 1)
    }

    fn release_sync(&self, session: &str, token: &str) -> Result<bool> {
        let db = self.conn()?;
        let changed = db.execute(
            "DELETE FROM session_locks WHERE session_id = ?1 AND holder_token = ?2",
            params![session, token],
        )?;
        Ok(changed == 1)
    }

    fn holder_sync(&self, session: &str) -> Result<Option<String>> {
        let db = self.conn()?;
        let holder = db
            .query_row(
                "SELECT holder_name FROM session_locks
                 WHERE session_id = ?1 AND expires_at > ?2",
                params![session, now_millis()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(holder)
    }

    // --- processing flag ----------------------------------------------------

    fn start_sync(&self, session: &str) -> Result<()> {
        let now = now_millis();
        let expires = now + self.flag_ttl.as_millis() as i64;
        let db = self.conn()?;
        // Flags left behind by a crashed consumer.
        let lapsed = db.execute(
            "DELETE FROM processing_flags WHERE expires_at <= ?1",
            params![now],
        )?;
        if lapsed > 0 {
            debug!(lapsed, "expired processing flags removed");
        }
        db.execute(
            "INSERT OR REPLACE INTO processing_flags (session_id, active_since, expires_at)
             VALUES (?1, ?2, ?3)",
            params![session, now, expires],
        )?;
        Ok(())
    }

    fn finish_sync(&self, session: &str) -> Result<()> {
        let db = self.conn()?;
        db.execute(
            "DELETE FROM processing_flags WHERE session_id = ?1",
            params![session],
        )?;
        Ok(())
    }

    fn is_processing_sync(&self, session: &str) -> Result<bool> {
        let db = self.conn()?;
        let busy: bool = db.query_row(
            "SELECT EXISTS(SELECT 1 FROM processing_flags
                           WHERE session_id = ?1 AND expires_at > ?2)",
            params![session, now_millis()],
            |row| row.get(0),
        )?;
        Ok(busy)
    }

    // --- pending queue ------------------------------------------------------

    fn enqueue_sync(&self, session: &str, msg: &PendingMessage) -> Result<EnqueueResult> {
        let payload = serde_json::to_string(msg)?;
        let now = now_millis();
        let mut db = self.conn()?;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        purge_expired(&tx, now)?;

        let duplicate: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM pending_messages
                           WHERE session_id = ?1 AND user_id = ?2)",
            params![session, msg.user_id],
            |row| row.get(0),
        )?;
        if duplicate {
            tx.commit()?;
            return Ok(EnqueueResult::Duplicate);
        }

        let count = count_entries(&tx, session)?;
        if count >= self.limits.max_entries {
            tx.commit()?;
            return Ok(EnqueueResult::Full);
        }

        tx.execute(
            "INSERT INTO pending_messages (session_id, user_id, payload) VALUES (?1, ?2, ?3)",
            params![session, msg.user_id, payload],
        )?;
        touch_queue(&tx, session, now + self.limits.ttl_ms())?;
        tx.commit()?;

        Ok(EnqueueResult::Success {
            position: count + 1,
        })
    }

    fn dequeue_sync(&self, session: &str) -> Result<DequeueResult> {
        let now = now_millis();
        let mut db = self.conn()?;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        purge_expired(&tx, now)?;

        let head: Option<(i64, String)> = tx
            .query_row(
                "SELECT seq, payload FROM pending_messages
                 WHERE session_id = ?1 ORDER BY seq LIMIT 1",
                params![session],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((seq, payload)) = head else {
            tx.commit()?;
            return Ok(DequeueResult::Empty);
        };

        tx.execute("DELETE FROM pending_messages WHERE seq = ?1", params![seq])?;
        if count_entries(&tx, session)? == 0 {
            tx.execute(
                "DELETE FROM pending_queues WHERE session_id = ?1",
                params![session],
            )?;
        } else {
            touch_queue(&tx, session, now + self.limits.ttl_ms())?;
        }
        tx.commit()?;

        Ok(decode_entry(session, seq, &payload))
    }

    fn waiting_sync(&self, session: &str) -> Result<Vec<PendingMessage>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT m.seq, m.payload FROM pending_messages m
             JOIN pending_queues q ON q.session_id = m.session_id
             WHERE m.session_id = ?1 AND q.expires_at > ?2
             ORDER BY m.seq",
        )?;
        let rows = stmt.query_map(params![session, now_millis()], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (seq, payload) = row?;
            if let DequeueResult::Success(msg) = decode_entry(session, seq, &payload) {
                out.push(msg);
            }
        }
        Ok(out)
    }

    fn size_sync(&self, session: &str) -> Result<usize> {
        let db = self.conn()?;
        let n: i64 = db.query_row(
            "SELECT COUNT(*) FROM pending_messages m
             JOIN pending_queues q ON q.session_id = m.session_id
             WHERE m.session_id = ?1 AND q.expires_at > ?2",
            params![session, now_millis()],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    fn clear_sync(&self, session: &str) -> Result<usize> {
        let mut db = self.conn()?;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let removed = tx.execute(
            "DELETE FROM pending_messages WHERE session_id = ?1",
            params![session],
        )?;
        tx.execute(
            "DELETE FROM pending_queues WHERE session_id = ?1",
            params![session],
        )?;
        tx.commit()?;
        Ok(removed)
    }
}

/// Drop every queue whose TTL has lapsed, including ones no session will
/// touch again.
fn purge_expired(tx: &Transaction<'_>, now: i64) -> Result<()> {
    let dropped = tx.execute(
        "DELETE FROM pending_messages WHERE session_id IN (
             SELECT session_id FROM pending_queues WHERE expires_at <= ?1
         )",
        params![now],
    )?;
    let queues = tx.execute(
        "DELETE FROM pending_queues WHERE expires_at <= ?1",
        params![now],
    )?;
    if queues > 0 {
        debug!(queues, dropped, "expired pending queues purged");
    }
    Ok(())
}

fn count_entries(tx: &Transaction<'_>, session: &str) -> Result<usize> {
    let n: i64 = tx.query_row(
        "SELECT COUNT(*) FROM pending_messages WHERE session_id = ?1",
        params![session],
        |row| row.get(0),
    )?;
    Ok(n as usize)
}

fn touch_queue(tx: &Transaction<'_>, session: &str, expires_at: i64) -> Result<()> {
    tx.execute(
        "INSERT INTO pending_queues (session_id, expires_at) VALUES (?1, ?2)
         ON CONFLICT(session_id) DO UPDATE SET expires_at = excluded.expires_at",
        params![session, expires_at],
    )?;
    Ok(())
}

/// Decode a stored payload; anything unreadable is reported as exhausted.
fn decode_entry(session: &str, seq: i64, payload: &str) -> DequeueResult {
    match serde_json::from_str::<PendingMessage>(payload) {
        Ok(msg) => match msg.validate() {
            Ok(()) => DequeueResult::Success(msg),
            Err(reason) => {
                warn!(session, seq, %reason, "invalid pending entry skipped");
                DequeueResult::Exhausted
            }
        },
        Err(e) => {
            warn!(session, seq, error = %e, "undecodable pending entry skipped");
            DequeueResult::Exhausted
        }
    }
}

#[async_trait]
impl LockStore for SqliteStore {
    async fn try_acquire(
        &self,
        session: &SessionId,
        token: &str,
        holder: &str,
        lease: Duration,
    ) -> Result<bool> {
        self.acquire_sync(session.as_str(), token, holder, lease)
    }

    async fn renew(&self, session: &SessionId, token: &str, lease: Duration) -> Result<bool> {
        self.renew_sync(session.as_str(), token, lease)
    }

    async fn release(&self, session: &SessionId, token: &str) -> Result<bool> {
        self.release_sync(session.as_str(), token)
    }

    async fn holder(&self, session: &SessionId) -> Result<Option<String>> {
        self.holder_sync(session.as_str())
    }
}

#[async_trait]
impl ProcessingFlagStore for SqliteStore {
    async fn start_processing(&self, session: &SessionId) -> Result<()> {
        self.start_sync(session.as_str())
    }

    async fn finish_processing(&self, session: &SessionId) -> Result<()> {
        self.finish_sync(session.as_str())
    }

    async fn is_processing(&self, session: &SessionId) -> Result<bool> {
        self.is_processing_sync(session.as_str())
    }
}

#[async_trait]
impl PendingQueueStore for SqliteStore {
    #[instrument(skip(self, msg), fields(session = %session, user = %msg.user_id))]
    async fn enqueue(&self, session: &SessionId, msg: &PendingMessage) -> Result<EnqueueResult> {
        self.enqueue_sync(session.as_str(), msg)
    }

    #[instrument(skip(self), fields(session = %session))]
    async fn dequeue(&self, session: &SessionId) -> Result<DequeueResult> {
        self.dequeue_sync(session.as_str())
    }

    async fn size(&self, session: &SessionId) -> Result<usize> {
        self.size_sync(session.as_str())
    }

    async fn waiting(&self, session: &SessionId) -> Result<Vec<PendingMessage>> {
        self.waiting_sync(session.as_str())
    }

    #[instrument(skip(self), fields(session = %session))]
    async fn clear(&self, session: &SessionId) -> Result<usize> {
        self.clear_sync(session.as_str())
    }
}
