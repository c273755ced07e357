//! Process-local store backed by `DashMap`.
//!
//! Every operation runs under the shard lock of a single key through the
//! entry API, which gives the same per-key atomicity the SQLite store gets
//! from its statements. Only valid when a single consumer process runs.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use tracing::{debug, warn};
use turnstile_core::{now_millis, DequeueResult, EnqueueResult, PendingMessage, SessionId};

use crate::error::Result;
use crate::flag::ProcessingFlagStore;
use crate::lock::LockStore;
use crate::queue::{PendingQueueStore, QueueLimits};

struct Lease {
    token: String,
    holder: String,
    expires_at: i64,
}

#[derive(Default)]
struct SessionQueue {
    entries: VecDeque<PendingMessage>,
    expires_at: i64,
}

impl SessionQueue {
    fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}

pub struct MemoryStore {
    locks: DashMap<String, Lease>,
    flags: DashMap<String, i64>,
    queues: DashMap<String, SessionQueue>,
    limits: QueueLimits,
    flag_ttl: Duration,
}

impl MemoryStore {
    pub fn new(limits: QueueLimits, flag_ttl: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            flags: DashMap::new(),
            queues: DashMap::new(),
            limits,
            flag_ttl,
        }
    }

    /// Drop the session's queue record once nothing is waiting in it. The
    /// check runs under the shard lock, so a concurrent enqueue is kept.
    fn forget_if_empty(&self, session: &SessionId) {
        self.queues
            .remove_if(session.as_str(), |_, q| q.entries.is_empty());
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(QueueLimits::default(), Duration::from_secs(60))
    }
}

#[async_trait]
impl LockStore for MemoryStore {
    async fn try_acquire(
        &self,
        session: &SessionId,
        token: &str,
        holder: &str,
        lease: Duration,
    ) -> Result<bool> {
        let now = now_millis();
        let fresh = Lease {
            token: token.to_string(),
            holder: holder.to_string(),
            expires_at: now + lease.as_millis() as i64,
        };
        match self.locks.entry(session.to_string()) {
            Entry::Occupied(mut e) if e.get().expires_at <= now => {
                e.insert(fresh);
                Ok(true)
            }
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(e) => {
                e.insert(fresh);
                Ok(true)
            }
        }
    }

    async fn renew(&self, session: &SessionId, token: &str, lease: Duration) -> Result<bool> {
        match self.locks.get_mut(session.as_str()) {
            Some(mut l) if l.token == token => {
                l.expires_at = now_millis() + lease.as_millis() as i64;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, session: &SessionId, token: &str) -> Result<bool> {
        Ok(self
            .locks
            .remove_if(session.as_str(), |_, l| l.token == token)
            .is_some())
    }

    async fn holder(&self, session: &SessionId) -> Result<Option<String>> {
        let now = now_millis();
        Ok(self
            .locks
            .get(session.as_str())
            .filter(|l| l.expires_at > now)
            .map(|l| l.holder.clone()))
    }
}

#[async_trait]
impl ProcessingFlagStore for MemoryStore {
    async fn start_processing(&self, session: &SessionId) -> Result<()> {
        let expires = now_millis() + self.flag_ttl.as_millis() as i64;
        self.flags.insert(session.to_string(), expires);
        Ok(())
    }

    async fn finish_processing(&self, session: &SessionId) -> Result<()> {
        self.flags.remove(session.as_str());
        Ok(())
    }

    async fn is_processing(&self, session: &SessionId) -> Result<bool> {
        let now = now_millis();
        Ok(self
            .flags
            .get(session.as_str())
            .is_some_and(|expires| *expires > now))
    }
}

#[async_trait]
impl PendingQueueStore for MemoryStore {
    async fn enqueue(&self, session: &SessionId, msg: &PendingMessage) -> Result<EnqueueResult> {
        let now = now_millis();
        let result = {
            let mut queue = self.queues.entry(session.to_string()).or_default();
            if queue.is_expired(now) && !queue.entries.is_empty() {
                debug!(session = %session, dropped = queue.entries.len(), "expired pending queue purged");
                queue.entries.clear();
            }

            if queue.entries.iter().any(|m| m.user_id == msg.user_id) {
                EnqueueResult::Duplicate
            } else if queue.entries.len() >= self.limits.max_entries {
                EnqueueResult::Full
            } else {
                queue.entries.push_back(msg.clone());
                queue.expires_at = now + self.limits.ttl_ms();
                EnqueueResult::Success {
                    position: queue.entries.len(),
                }
            }
        };
        if !matches!(result, EnqueueResult::Success { .. }) {
            self.forget_if_empty(session);
        }
        Ok(result)
    }

    async fn dequeue(&self, session: &SessionId) -> Result<DequeueResult> {
        let now = now_millis();
        let popped = match self.queues.get_mut(session.as_str()) {
            None => return Ok(DequeueResult::Empty),
            Some(mut queue) if queue.is_expired(now) => {
                if !queue.entries.is_empty() {
                    debug!(session = %session, dropped = queue.entries.len(), "expired pending queue purged");
                }
                queue.entries.clear();
                None
            }
            Some(mut queue) => {
                let msg = queue.entries.pop_front();
                queue.expires_at = now + self.limits.ttl_ms();
                msg
            }
        };
        self.forget_if_empty(session);

        let Some(msg) = popped else {
            return Ok(DequeueResult::Empty);
        };
        match msg.validate() {
            Ok(()) => Ok(DequeueResult::Success(msg)),
            Err(reason) => {
                warn!(session = %session, %reason, "invalid pending entry skipped");
                Ok(DequeueResult::Exhausted)
            }
        }
    }

    async fn size(&self, session: &SessionId) -> Result<usize> {
        let now = now_millis();
        Ok(self
            .queues
            .get(session.as_str())
            .filter(|q| !q.is_expired(now))
            .map(|q| q.entries.len())
            .unwrap_or(0))
    }

    async fn waiting(&self, session: &SessionId) -> Result<Vec<PendingMessage>> {
        let now = now_millis();
        Ok(self
            .queues
            .get(session.as_str())
            .filter(|q| !q.is_expired(now))
            .map(|q| {
                q.entries
                    .iter()
                    .filter(|m| m.validate().is_ok())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn clear(&self, session: &SessionId) -> Result<usize> {
        Ok(self
            .queues
            .remove(session.as_str())
            .map(|(_, q)| q.entries.len())
            .unwrap_or(0))
    }
}
