use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use turnstile_core::config::StreamConfig;

use crate::error::Result;
use crate::log::StreamLog;
use crate::types::{EntryId, StartFrom, StreamEntry};

/// Processes one delivered entry. Failures are the handler's to report; the
/// entry is acknowledged once `handle` returns or panics.
#[async_trait]
pub trait EntryHandler: Send + Sync {
    async fn handle(&self, entry: StreamEntry);
}

#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    pub stream: String,
    pub group: String,
    pub consumer: String,
    pub batch_size: usize,
    /// Longest a single read waits for new entries.
    pub block: Duration,
    pub poll_interval: Duration,
    /// Upper bound on entries handled at the same time.
    pub concurrency: usize,
    /// Other consumers' entries unacknowledged this long are taken over.
    pub claim_idle: Duration,
    pub claim_interval: Duration,
    pub reset_on_start: bool,
}

impl From<&StreamConfig> for ConsumerOptions {
    fn from(config: &StreamConfig) -> Self {
        Self {
            stream: config.inbound.clone(),
            group: config.group.clone(),
            consumer: config.consumer.clone(),
            batch_size: config.batch_size,
            block: config.block(),
            poll_interval: config.poll_interval(),
            concurrency: config.concurrency,
            claim_idle: config.claim_idle(),
            claim_interval: config.claim_interval(),
            reset_on_start: config.reset_group_on_start,
        }
    }
}

/// Reads the inbound stream through a consumer group and fans entries out to
/// an [`EntryHandler`].
pub struct StreamConsumer {
    log: Arc<dyn StreamLog>,
    opts: ConsumerOptions,
}

impl StreamConsumer {
    /// Join the group, creating it (or rewinding it) as configured.
    ///
    /// This is the only fallible step of the consumer's life; once connected,
    /// read errors are logged and retried.
    pub async fn connect(log: Arc<dyn StreamLog>, opts: ConsumerOptions) -> Result<Self> {
        log.ensure_group(&opts.stream, &opts.group, StartFrom::Latest)
            .await?;
        if opts.reset_on_start {
            log.reset_group(&opts.stream, &opts.group, StartFrom::Beginning)
                .await?;
        }
        info!(
            stream = %opts.stream,
            group = %opts.group,
            consumer = %opts.consumer,
            "stream consumer connected"
        );
        Ok(Self { log, opts })
    }

    pub fn options(&self) -> &ConsumerOptions {
        &self.opts
    }

    /// Consume until `shutdown` fires, then wait for in-flight handlers.
    pub async fn run(&self, shutdown: CancellationToken, handler: Arc<dyn EntryHandler>) {
        let permits = Arc::new(Semaphore::new(self.opts.concurrency.max(1)));
        let mut tasks = JoinSet::new();

        let adopted = self.adopt_stale().await;
        if adopted > 0 {
            info!(count = adopted, "claimed entries left by other consumers");
        }
        let recovered = self
            .recover_pending(&shutdown, &handler, &permits, &mut tasks)
            .await;
        if recovered > 0 {
            info!(count = recovered, "re-delivered unacknowledged entries");
        }

        let mut next_claim = Instant::now() + self.opts.claim_interval;
        while !shutdown.is_cancelled() {
            if Instant::now() >= next_claim {
                next_claim = Instant::now() + self.opts.claim_interval;
                for entry in self.claim_batch().await {
                    self.spawn_entry(entry, &handler, &permits, &mut tasks).await;
                }
            }

            let batch = match self.read_blocking(&shutdown).await {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(error = %e, "stream read failed");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.opts.poll_interval) => continue,
                    }
                }
            };
            if !batch.is_empty() {
                debug!(count = batch.len(), "batch received");
            }
            for entry in batch {
                self.spawn_entry(entry, &handler, &permits, &mut tasks).await;
            }
            while let Some(done) = tasks.try_join_next() {
                log_join(done);
            }
        }

        info!(in_flight = tasks.len(), "stream consumer stopping");
        while let Some(done) = tasks.join_next().await {
            log_join(done);
        }
        info!("stream consumer stopped");
    }

    /// Reassign every stale entry of other consumers to this one, so that
    /// `recover_pending` hands them out with this consumer's own.
    async fn adopt_stale(&self) -> usize {
        let mut total = 0;
        loop {
            let claimed = self.claim_batch().await;
            if claimed.is_empty() {
                return total;
            }
            total += claimed.len();
        }
    }

    async fn claim_batch(&self) -> Vec<StreamEntry> {
        match self
            .log
            .claim_stale(
                &self.opts.stream,
                &self.opts.group,
                &self.opts.consumer,
                self.opts.claim_idle,
                self.opts.batch_size,
            )
            .await
        {
            Ok(claimed) => {
                if !claimed.is_empty() {
                    debug!(count = claimed.len(), "stale entries claimed");
                }
                claimed
            }
            Err(e) => {
                warn!(error = %e, "claiming stale entries failed");
                Vec::new()
            }
        }
    }

    /// Hand this consumer's own unacknowledged entries back to the handler,
    /// oldest first. Waits for each batch before reading the next one.
    async fn recover_pending(
        &self,
        shutdown: &CancellationToken,
        handler: &Arc<dyn EntryHandler>,
        permits: &Arc<Semaphore>,
        tasks: &mut JoinSet<()>,
    ) -> usize {
        let mut after: EntryId = 0;
        let mut total = 0;
        while !shutdown.is_cancelled() {
            let batch = match self
                .log
                .read_pending(
                    &self.opts.stream,
                    &self.opts.group,
                    &self.opts.consumer,
                    after,
                    self.opts.batch_size,
                )
                .await
            {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(error = %e, "pending entry recovery failed");
                    break;
                }
            };
            let Some(last) = batch.last().map(|e| e.id) else {
                break;
            };
            after = last;
            total += batch.len();
            for entry in batch {
                self.spawn_entry(entry, handler, permits, tasks).await;
            }
            while let Some(done) = tasks.join_next().await {
                log_join(done);
            }
        }
        total
    }

    /// Poll for new entries until some arrive, the block time elapses, or
    /// shutdown is requested.
    async fn read_blocking(&self, shutdown: &CancellationToken) -> Result<Vec<StreamEntry>> {
        let deadline = Instant::now() + self.opts.block;
        loop {
            let batch = self
                .log
                .read_group(
                    &self.opts.stream,
                    &self.opts.group,
                    &self.opts.consumer,
                    self.opts.batch_size,
                )
                .await?;
            if !batch.is_empty() || Instant::now() >= deadline {
                return Ok(batch);
            }
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(Vec::new()),
                _ = tokio::time::sleep(self.opts.poll_interval) => {}
            }
        }
    }

    /// Start handling `entry` once a concurrency slot frees up.
    ///
    /// Entries already read are always handled, even during shutdown; they
    /// are recorded as pending and would otherwise wait for a restart.
    async fn spawn_entry(
        &self,
        entry: StreamEntry,
        handler: &Arc<dyn EntryHandler>,
        permits: &Arc<Semaphore>,
        tasks: &mut JoinSet<()>,
    ) {
        let Ok(permit) = permits.clone().acquire_owned().await else {
            return;
        };
        let handler = Arc::clone(handler);
        let log = Arc::clone(&self.log);
        let stream = self.opts.stream.clone();
        let group = self.opts.group.clone();

        tasks.spawn(async move {
            let _permit = permit;
            let id = entry.id;
            if AssertUnwindSafe(handler.handle(entry))
                .catch_unwind()
                .await
                .is_err()
            {
                error!(entry = id, "entry handler panicked");
            }
            if let Err(e) = log.ack(&stream, &group, &[id]).await {
                warn!(entry = id, error = %e, "ack failed; entry will be re-delivered");
            }
        });
    }
}

fn log_join(result: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        error!(error = %e, "entry task failed");
    }
}
