//! Bounded, deduplicated, per-session backlog of messages that arrived while
//! the session was busy.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use turnstile_core::{
    config::QueueConfig, now_millis, DequeueResult, EnqueueResult, PendingMessage, SessionId,
};

use crate::error::Result;

/// Capacity and lifetime of every per-session queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueLimits {
    pub max_entries: usize,
    /// Refreshed on every mutation; an untouched queue is dropped wholesale.
    pub ttl: Duration,
}

impl QueueLimits {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self { max_entries, ttl }
    }

    pub(crate) fn ttl_ms(&self) -> i64 {
        self.ttl.as_millis() as i64
    }
}

impl Default for QueueLimits {
    fn default() -> Self {
        QueueLimits::from(&QueueConfig::default())
    }
}

impl From<&QueueConfig> for QueueLimits {
    fn from(config: &QueueConfig) -> Self {
        Self::new(config.max_per_session, config.ttl())
    }
}

#[async_trait]
pub trait PendingQueueStore: Send + Sync {
    /// Append unless the user already waits (Duplicate) or the queue is at
    /// capacity (Full). Neither rejection mutates the queue.
    async fn enqueue(&self, session: &SessionId, msg: &PendingMessage) -> Result<EnqueueResult>;

    /// Remove the oldest entry. A corrupt entry is removed and reported as
    /// [`DequeueResult::Exhausted`].
    async fn dequeue(&self, session: &SessionId) -> Result<DequeueResult>;

    async fn size(&self, session: &SessionId) -> Result<usize>;

    /// Readable entries in queue order, without removing them.
    async fn waiting(&self, session: &SessionId) -> Result<Vec<PendingMessage>>;

    /// Drop every entry for the session. Returns how many were removed.
    async fn clear(&self, session: &SessionId) -> Result<usize>;

    /// Who is waiting and for how long, for user-facing notifications.
    async fn queue_details(&self, session: &SessionId) -> Result<QueueDetails> {
        let now = now_millis();
        let entries = self
            .waiting(session)
            .await?
            .into_iter()
            .map(|m| WaitingUser {
                name: m.display_name().to_string(),
                waited: Duration::from_millis((now - m.enqueued_at_ms).max(0) as u64),
            })
            .collect();
        Ok(QueueDetails { entries })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitingUser {
    pub name: String,
    pub waited: Duration,
}

/// Snapshot of a session's queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueDetails {
    pub entries: Vec<WaitingUser>,
}

impl QueueDetails {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// One line per waiting user: `1. alice (12s)`.
impl fmt::Display for QueueDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, user) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{}. {} ({}s)", i + 1, user.name, user.waited.as_secs())?;
        }
        Ok(())
    }
}
