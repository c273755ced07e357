use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, TurnstileError};

pub const DEFAULT_INBOUND_STREAM: &str = "bot:inbound";
pub const DEFAULT_OUTBOUND_STREAM: &str = "bot:outbound";
pub const DEFAULT_GROUP: &str = "bot-workers";
pub const DEFAULT_MAX_PENDING: usize = 5;
pub const DEFAULT_QUEUE_TTL_SECS: u64 = 300; // abandoned queues vanish after 5 minutes
pub const DEFAULT_MAX_DRAIN_ITERATIONS: usize = 10;
pub const DEFAULT_LEASE_SECS: u64 = 60;
pub const DEFAULT_EXEC_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MESSAGE_LIMIT: usize = 4000;

/// Top-level config (turnstile.toml + TURNSTILE_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub bot: BotConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Where locks, flags and pending queues live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Shared SQLite file: safe across processes.
    #[default]
    Sqlite,
    /// Process-local maps: single consumer process only.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Processing flags self-expire after this long even if never cleared.
    #[serde(default = "default_flag_ttl_secs")]
    pub flag_ttl_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            flag_ttl_secs: default_flag_ttl_secs(),
        }
    }
}

impl StoreConfig {
    pub fn flag_ttl(&self) -> Duration {
        Duration::from_secs(self.flag_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_inbound")]
    pub inbound: String,
    #[serde(default = "default_outbound")]
    pub outbound: String,
    #[serde(default = "default_group")]
    pub group: String,
    /// Consumer name inside the group. Stable across restarts so that the
    /// process picks up its own unacknowledged entries first.
    #[serde(default = "default_consumer")]
    pub consumer: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// How long one read waits for new entries before returning empty.
    #[serde(default = "default_block_ms")]
    pub block_ms: u64,
    /// Poll cadence while blocked on an empty log.
    #[serde(default = "default_poll_ms")]
    pub poll_ms: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Entries another consumer left unacknowledged this long are taken over.
    #[serde(default = "default_claim_idle_ms")]
    pub claim_idle_ms: u64,
    /// How often a running consumer looks for such entries.
    #[serde(default = "default_claim_interval_ms")]
    pub claim_interval_ms: u64,
    /// Rewind the group cursor to the start of the log on startup.
    #[serde(default)]
    pub reset_group_on_start: bool,
    /// Approximate cap on the outbound log length.
    #[serde(default = "default_outbound_max_len")]
    pub outbound_max_len: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            inbound: default_inbound(),
            outbound: default_outbound(),
            group: default_group(),
            consumer: default_consumer(),
            batch_size: default_batch_size(),
            block_ms: default_block_ms(),
            poll_ms: default_poll_ms(),
            concurrency: default_concurrency(),
            claim_idle_ms: default_claim_idle_ms(),
            claim_interval_ms: default_claim_interval_ms(),
            reset_group_on_start: false,
            outbound_max_len: default_outbound_max_len(),
        }
    }
}

impl StreamConfig {
    pub fn block(&self) -> Duration {
        Duration::from_millis(self.block_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }

    pub fn claim_idle(&self) -> Duration {
        Duration::from_millis(self.claim_idle_ms)
    }

    pub fn claim_interval(&self) -> Duration {
        Duration::from_millis(self.claim_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_max_pending")]
    pub max_per_session: usize,
    #[serde(default = "default_queue_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_max_drain_iterations")]
    pub max_drain_iterations: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_per_session: DEFAULT_MAX_PENDING,
            ttl_secs: DEFAULT_QUEUE_TTL_SECS,
            max_drain_iterations: DEFAULT_MAX_DRAIN_ITERATIONS,
        }
    }
}

impl QueueConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
    /// Extend the lease in the background while a command runs.
    #[serde(default = "bool_true")]
    pub renew: bool,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lease_secs: DEFAULT_LEASE_SECS,
            renew: true,
        }
    }
}

impl LockConfig {
    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_exec_timeout_secs")]
    pub timeout_secs: u64,
    /// Platform message-length limit in characters.
    #[serde(default = "default_message_limit")]
    pub message_limit: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_EXEC_TIMEOUT_SECS,
            message_limit: DEFAULT_MESSAGE_LIMIT,
        }
    }
}

impl ExecutorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BotKind {
    /// Number guessing game.
    #[default]
    Guess,
    /// Bulls-and-cows deduction game.
    Deduce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    En,
    Ko,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default)]
    pub kind: BotKind,
    #[serde(default)]
    pub locale: Locale,
}

fn bool_true() -> bool {
    true
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.turnstile/turnstile.db", home)
}
fn default_flag_ttl_secs() -> u64 {
    // Outlives the slowest allowed command so the flag never lapses mid-run.
    DEFAULT_EXEC_TIMEOUT_SECS * 2
}
fn default_inbound() -> String {
    DEFAULT_INBOUND_STREAM.to_string()
}
fn default_outbound() -> String {
    DEFAULT_OUTBOUND_STREAM.to_string()
}
fn default_group() -> String {
    DEFAULT_GROUP.to_string()
}
fn default_consumer() -> String {
    let host = std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| "local".to_string());
    format!("consumer-{}", host.trim())
}
fn default_claim_idle_ms() -> u64 {
    // Several executor deadlines, so a live consumer's slow entry is not stolen.
    DEFAULT_EXEC_TIMEOUT_SECS * 4 * 1_000
}
fn default_claim_interval_ms() -> u64 {
    30_000
}
fn default_batch_size() -> usize {
    10
}
fn default_block_ms() -> u64 {
    2_000
}
fn default_poll_ms() -> u64 {
    100
}
fn default_concurrency() -> usize {
    8
}
fn default_outbound_max_len() -> usize {
    10_000
}
fn default_max_pending() -> usize {
    DEFAULT_MAX_PENDING
}
fn default_queue_ttl_secs() -> u64 {
    DEFAULT_QUEUE_TTL_SECS
}
fn default_max_drain_iterations() -> usize {
    DEFAULT_MAX_DRAIN_ITERATIONS
}
fn default_lease_secs() -> u64 {
    DEFAULT_LEASE_SECS
}
fn default_exec_timeout_secs() -> u64 {
    DEFAULT_EXEC_TIMEOUT_SECS
}
fn default_message_limit() -> usize {
    DEFAULT_MESSAGE_LIMIT
}

impl TurnstileConfig {
    /// Load config from a TOML file with TURNSTILE_* env var overrides.
    ///
    /// Nested keys use a double underscore:
    /// `TURNSTILE_QUEUE__MAX_PER_SESSION=3`.
    /// A missing file is not an error; every section has defaults.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: TurnstileConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("TURNSTILE_").split("__"))
            .extract()
            .map_err(|e| TurnstileError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let zero =
            |name: &str| TurnstileError::Invalid(format!("{name} must be greater than zero"));
        if self.queue.max_per_session == 0 {
            return Err(zero("queue.max_per_session"));
        }
        if self.queue.max_drain_iterations == 0 {
            return Err(zero("queue.max_drain_iterations"));
        }
        if self.stream.batch_size == 0 {
            return Err(zero("stream.batch_size"));
        }
        if self.stream.concurrency == 0 {
            return Err(zero("stream.concurrency"));
        }
        if self.lock.lease_secs == 0 {
            return Err(zero("lock.lease_secs"));
        }
        if self.executor.timeout_secs == 0 {
            return Err(zero("executor.timeout_secs"));
        }
        if self.executor.message_limit < 16 {
            return Err(TurnstileError::Invalid(
                "executor.message_limit must be at least 16".to_string(),
            ));
        }
        if self.stream.inbound == self.stream.outbound {
            return Err(TurnstileError::Invalid(
                "stream.inbound and stream.outbound must differ".to_string(),
            ));
        }
        if self.stream.claim_interval_ms == 0 {
            return Err(zero("stream.claim_interval_ms"));
        }
        if self.stream.claim_idle() <= self.executor.timeout() {
            warn!(
                claim_idle_ms = self.stream.claim_idle_ms,
                timeout_secs = self.executor.timeout_secs,
                "claim idle time is not longer than the executor deadline; \
                 entries still being handled may be claimed by another consumer"
            );
        }
        if self.lock.lease_secs <= self.executor.timeout_secs && !self.lock.renew {
            warn!(
                lease_secs = self.lock.lease_secs,
                timeout_secs = self.executor.timeout_secs,
                "lock lease is not longer than the executor deadline and renewal is off; \
                 a slow command can lose its lock mid-run"
            );
        }
        Ok(())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.turnstile/turnstile.toml", home)
}
