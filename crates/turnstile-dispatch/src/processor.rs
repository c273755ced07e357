//! Per-session serialized execution.
//!
//! A command runs only while its session's lock is held. Messages arriving
//! while the session is busy wait in the pending queue, and whoever finishes
//! a command drains that queue before returning. Nothing here propagates an
//! error: every failure becomes a log line and, where a user is waiting, an
//! outbound message.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tracing::{debug, error, info, warn};
use turnstile_core::{
    now_millis, DequeueResult, EnqueueResult, InboundMessage, OutboundMessage, PendingMessage,
    SessionId, TurnstileConfig,
};
use turnstile_store::{LockError, LockManager, PendingQueueStore, ProcessingFlagStore};
use turnstile_stream::OutboundSink;

use crate::error::ExecError;
use crate::executor::CommandExecutor;
use crate::notifier::Notifier;

#[derive(Debug, Clone, Copy)]
pub struct ProcessorSettings {
    /// Upper bound on dequeue attempts per drain.
    pub max_drain_iterations: usize,
    pub exec_timeout: Duration,
    /// Characters per outbound message.
    pub message_limit: usize,
}

impl From<&TurnstileConfig> for ProcessorSettings {
    fn from(config: &TurnstileConfig) -> Self {
        Self {
            max_drain_iterations: config.queue.max_drain_iterations,
            exec_timeout: config.executor.timeout(),
            message_limit: config.executor.message_limit,
        }
    }
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self::from(&TurnstileConfig::default())
    }
}

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Ran without the lock (a command that needs no serialization).
    Immediate,
    /// Ran under the lock, followed by a drain of the pending queue.
    Executed { drain: DrainReport },
    /// Went to the pending queue instead of running.
    Queued(EnqueueResult),
    /// The store failed; the user was told to retry.
    StoreFailure,
}

/// Summary of one drain loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub iterations: usize,
    pub executed: usize,
    /// Corrupt entries skipped.
    pub skipped: usize,
    /// Set when a dequeued message lost the lock race and was put back.
    pub requeued: Option<EnqueueResult>,
    /// The iteration cap was hit with entries still waiting.
    pub backpressure: bool,
}

pub struct QueueProcessor {
    locks: LockManager,
    flags: Arc<dyn ProcessingFlagStore>,
    queue: Arc<dyn PendingQueueStore>,
    executor: Arc<dyn CommandExecutor>,
    sink: Arc<dyn OutboundSink>,
    notifier: Notifier,
    settings: ProcessorSettings,
}

impl QueueProcessor {
    pub fn new(
        locks: LockManager,
        flags: Arc<dyn ProcessingFlagStore>,
        queue: Arc<dyn PendingQueueStore>,
        executor: Arc<dyn CommandExecutor>,
        sink: Arc<dyn OutboundSink>,
        notifier: Notifier,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            locks,
            flags,
            queue,
            executor,
            sink,
            notifier,
            settings,
        }
    }

    /// Route one inbound message: run it now, or queue it behind the
    /// session's current work.
    pub async fn dispatch(&self, msg: &InboundMessage) -> DispatchOutcome {
        let session = &msg.session_id;
        let pending = msg.to_pending(now_millis());

        if !self.executor.requires_serialization(&msg.content) {
            let result = self.execute_guarded(session, &pending).await;
            self.publish_result(session, &pending, result).await;
            return DispatchOutcome::Immediate;
        }

        let busy = match self.flags.is_processing(session).await {
            Ok(busy) => busy,
            Err(e) => {
                warn!(session = %session, error = %e, "processing flag check failed; assuming idle");
                false
            }
        };
        if busy {
            debug!(session = %session, user = %msg.user_id, "session busy; queueing");
            return self.enqueue_and_notify(session, &pending, None).await;
        }

        let locked = self
            .locks
            .with_lock(session, msg.display_name(), || {
                self.run_command(session, &pending)
            })
            .await;

        match locked {
            Ok(()) => {}
            Err(LockError::Held { holder, .. }) => {
                debug!(session = %session, %holder, "lock contention; queueing");
                return self.enqueue_and_notify(session, &pending, Some(&holder)).await;
            }
            Err(LockError::Store(e)) => {
                warn!(session = %session, error = %e, "lock acquisition failed");
                self.publish(self.notifier.store_failed(session, pending.thread_id.as_deref()))
                    .await;
                return DispatchOutcome::StoreFailure;
            }
        }

        let drain = self.drain(session).await;
        DispatchOutcome::Executed { drain }
    }

    /// Queue `pending` and tell its sender where it landed.
    pub async fn enqueue_and_notify(
        &self,
        session: &SessionId,
        pending: &PendingMessage,
        holder: Option<&str>,
    ) -> DispatchOutcome {
        let thread = pending.thread_id.as_deref();
        match self.queue.enqueue(session, pending).await {
            Ok(result) => {
                debug!(session = %session, user = %pending.user_id, ?result, "enqueue");
                self.publish(self.notifier.enqueued(session, thread, result, holder))
                    .await;
                DispatchOutcome::Queued(result)
            }
            Err(e) => {
                warn!(session = %session, error = %e, "enqueue failed");
                self.publish(self.notifier.store_failed(session, thread)).await;
                DispatchOutcome::StoreFailure
            }
        }
    }

    /// Work through the pending queue, one locked command per entry.
    ///
    /// Stops on an empty queue, on lock contention (the message goes back to
    /// the queue and the current holder will drain it), on a store failure,
    /// or after `max_drain_iterations` attempts.
    pub async fn drain(&self, session: &SessionId) -> DrainReport {
        let mut report = DrainReport::default();

        while report.iterations < self.settings.max_drain_iterations {
            report.iterations += 1;

            let pending = match self.queue.dequeue(session).await {
                Ok(DequeueResult::Empty) => return report,
                Ok(DequeueResult::Exhausted) => {
                    report.skipped += 1;
                    continue;
                }
                Ok(DequeueResult::Success(pending)) => pending,
                Err(e) => {
                    warn!(session = %session, error = %e, "dequeue failed; drain stopped");
                    return report;
                }
            };

            let locked = self
                .locks
                .with_lock(session, pending.display_name(), || {
                    self.run_command(session, &pending)
                })
                .await;

            match locked {
                Ok(()) => report.executed += 1,
                Err(e) => {
                    if e.is_contention() {
                        debug!(session = %session, user = %pending.user_id, "drain lost lock race");
                    } else {
                        warn!(session = %session, error = %e, "lock acquisition failed during drain");
                    }
                    report.requeued = self.requeue(session, &pending).await;
                    return report;
                }
            }
        }

        match self.queue.size(session).await {
            Ok(left) if left > 0 => {
                warn!(
                    session = %session,
                    left,
                    iterations = report.iterations,
                    "drain iteration cap reached; backpressure"
                );
                report.backpressure = true;
            }
            Ok(_) => {}
            Err(e) => warn!(session = %session, error = %e, "queue size check failed"),
        }
        report
    }

    /// Put a drained message back at the tail of the queue.
    async fn requeue(
        &self,
        session: &SessionId,
        pending: &PendingMessage,
    ) -> Option<EnqueueResult> {
        match self.queue.enqueue(session, pending).await {
            Ok(result @ EnqueueResult::Success { .. }) => {
                debug!(session = %session, user = %pending.user_id, ?result, "message re-queued");
                Some(result)
            }
            Ok(EnqueueResult::Duplicate) => {
                // The user sent something newer meanwhile; that entry stands.
                debug!(session = %session, user = %pending.user_id, "re-queue dropped as duplicate");
                Some(EnqueueResult::Duplicate)
            }
            Ok(EnqueueResult::Full) => {
                warn!(session = %session, user = %pending.user_id, "re-queue rejected; queue full");
                self.publish(
                    self.notifier
                        .requeue_failed(session, pending.thread_id.as_deref()),
                )
                .await;
                Some(EnqueueResult::Full)
            }
            Err(e) => {
                error!(session = %session, user = %pending.user_id, error = %e, "re-queue failed; message lost");
                None
            }
        }
    }

    /// Body of the critical section: mark busy, execute, clear, reply.
    async fn run_command(&self, session: &SessionId, pending: &PendingMessage) {
        if let Err(e) = self.flags.start_processing(session).await {
            warn!(session = %session, error = %e, "failed to set processing flag");
        }

        let result = self.execute_guarded(session, pending).await;

        if let Err(e) = self.flags.finish_processing(session).await {
            warn!(session = %session, error = %e, "failed to clear processing flag");
        }

        self.publish_result(session, pending, result).await;
    }

    /// Run the executor under the deadline, turning a panic into an error.
    async fn execute_guarded(
        &self,
        session: &SessionId,
        pending: &PendingMessage,
    ) -> Result<Option<String>, ExecError> {
        let deadline = self.settings.exec_timeout;
        let call = AssertUnwindSafe(self.executor.execute(session, pending)).catch_unwind();
        match tokio::time::timeout(deadline, call).await {
            Err(_) => Err(ExecError::Timeout {
                ms: deadline.as_millis() as u64,
            }),
            Ok(Err(_)) => Err(ExecError::Internal("executor panicked".to_string())),
            Ok(Ok(result)) => result,
        }
    }

    async fn publish_result(
        &self,
        session: &SessionId,
        pending: &PendingMessage,
        result: Result<Option<String>, ExecError>,
    ) {
        let thread = pending.thread_id.as_deref();
        match result {
            Ok(Some(text)) => {
                for msg in self
                    .notifier
                    .reply(session, thread, &text, self.settings.message_limit)
                {
                    self.publish(msg).await;
                }
            }
            Ok(None) => {}
            Err(e) => {
                match &e {
                    ExecError::Domain(d) if d.expected => {
                        debug!(session = %session, code = %d.code, "command rejected")
                    }
                    ExecError::Domain(d) => {
                        warn!(session = %session, code = %d.code, message = %d.message, "command failed")
                    }
                    ExecError::Timeout { ms } => {
                        warn!(session = %session, user = %pending.user_id, ms, "command timed out")
                    }
                    ExecError::Store(err) => {
                        warn!(session = %session, error = %err, "command store failure")
                    }
                    ExecError::Internal(reason) => {
                        error!(session = %session, user = %pending.user_id, %reason, "command crashed")
                    }
                }
                self.publish(self.notifier.exec_failed(session, thread, &e))
                    .await;
            }
        }
    }

    async fn publish(&self, msg: OutboundMessage) {
        if let Err(e) = self.sink.publish(&msg).await {
            warn!(session = %msg.session_id, kind = %msg.kind, error = %e, "failed to publish reply");
        }
    }
}

impl std::fmt::Debug for QueueProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueProcessor")
            .field("settings", &self.settings)
            .field("locale", &self.notifier.locale())
            .finish_non_exhaustive()
    }
}

/// Log line for a finished dispatch.
pub(crate) fn log_outcome(session: &SessionId, outcome: &DispatchOutcome) {
    match outcome {
        DispatchOutcome::Executed { drain } if drain.executed > 0 || drain.backpressure => {
            info!(
                session = %session,
                drained = drain.executed,
                skipped = drain.skipped,
                backpressure = drain.backpressure,
                "command executed and queue drained"
            )
        }
        other => debug!(session = %session, outcome = ?other, "dispatch finished"),
    }
}
