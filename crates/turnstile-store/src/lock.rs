//! Distributed per-session mutual exclusion.
//!
//! A lock is a lease record keyed by session. Acquisition is one atomic
//! create-if-absent (or take-over-if-expired) operation in the backing store,
//! so there is no read-then-write window between competing processes.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};
use turnstile_core::SessionId;
use uuid::Uuid;

use crate::error::{LockError, Result};

/// Raw lease primitives. Implementations must make `try_acquire` atomic.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Create the lease if no live lease exists. `token` identifies this
    /// holder for renew/release; `holder` is the display name shown to others.
    async fn try_acquire(
        &self,
        session: &SessionId,
        token: &str,
        holder: &str,
        lease: Duration,
    ) -> Result<bool>;

    /// Push the expiry out by `lease`. Returns false if `token` no longer
    /// owns the record.
    async fn renew(&self, session: &SessionId, token: &str, lease: Duration) -> Result<bool>;

    /// Delete the record if `token` still owns it.
    async fn release(&self, session: &SessionId, token: &str) -> Result<bool>;

    /// Display name of the live holder, if any.
    async fn holder(&self, session: &SessionId) -> Result<Option<String>>;
}

/// Scoped lock acquisition on top of a [`LockStore`].
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn LockStore>,
    lease: Duration,
    renew: bool,
}

impl LockManager {
    pub fn new(store: Arc<dyn LockStore>, lease: Duration, renew: bool) -> Self {
        Self {
            store,
            lease,
            renew,
        }
    }

    pub fn lease(&self) -> Duration {
        self.lease
    }

    /// Run `f` while holding the session lock.
    ///
    /// Fails fast with [`LockError::Held`] when another caller owns a live
    /// lease; `f` is not invoked in that case. Otherwise the lease is
    /// released after `f` completes, returns an error value, or panics (the
    /// panic is resumed once the release has been attempted).
    pub async fn with_lock<F, Fut, T>(
        &self,
        session: &SessionId,
        holder_hint: &str,
        f: F,
    ) -> std::result::Result<T, LockError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let token = Uuid::new_v4().to_string();

        if !self
            .store
            .try_acquire(session, &token, holder_hint, self.lease)
            .await?
        {
            // The holder may release between the failed create and this read;
            // the name is only used for a user-facing message.
            let holder = self
                .store
                .holder(session)
                .await
                .ok()
                .flatten()
                .unwrap_or_else(|| "another player".to_string());
            debug!(session = %session, %holder, "lock contention");
            return Err(LockError::Held {
                session_id: session.to_string(),
                holder,
            });
        }
        debug!(session = %session, holder = %holder_hint, "lock acquired");

        let renewal = self.spawn_renewal(session, &token);
        let outcome = AssertUnwindSafe(f()).catch_unwind().await;
        drop(renewal);

        match self.store.release(session, &token).await {
            Ok(true) => debug!(session = %session, "lock released"),
            Ok(false) => warn!(session = %session, "lock lease expired before release"),
            // The lease will lapse on its own.
            Err(e) => warn!(session = %session, error = %e, "lock release failed"),
        }

        match outcome {
            Ok(value) => Ok(value),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    /// Keep extending the lease while the critical section runs.
    ///
    /// The returned guard stops the renewal task when dropped, including when
    /// the caller's future is cancelled mid-flight.
    fn spawn_renewal(&self, session: &SessionId, token: &str) -> Option<DropGuard> {
        let period = self.lease / 3;
        if !self.renew || period.is_zero() {
            return None;
        }

        let cancel = CancellationToken::new();
        let stop = cancel.clone();
        let store = Arc::clone(&self.store);
        let session = session.clone();
        let token = token.to_string();
        let lease = self.lease;

        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => match store.renew(&session, &token, lease).await {
                        Ok(true) => debug!(session = %session, "lock lease renewed"),
                        Ok(false) => {
                            warn!(session = %session, "lock lease lost; stopping renewal");
                            break;
                        }
                        Err(e) => warn!(session = %session, error = %e, "lock renewal failed"),
                    },
                }
            }
        });

        Some(cancel.drop_guard())
    }
}
