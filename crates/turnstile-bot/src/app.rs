use std::sync::Arc;

use rusqlite::Connection;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use turnstile_core::config::{BotKind, StoreBackend};
use turnstile_core::TurnstileConfig;
use turnstile_dispatch::{
    CommandExecutor, DispatchHandler, Notifier, ProcessorSettings, QueueProcessor,
};
use turnstile_store::{
    db, LockManager, LockStore, MemoryStore, PendingQueueStore, ProcessingFlagStore, QueueLimits,
    SqliteStore,
};
use turnstile_stream::{
    ConsumerOptions, OutboundPublisher, SqliteStreamLog, StreamConsumer, StreamLog,
};

use crate::games::deduce::DeduceGame;
use crate::games::guess::GuessGame;
use crate::games::store::GameStore;
use crate::games::{Game, GameExecutor};

/// The coordination stores of one backend, plus a connection for game state.
struct Stores {
    locks: Arc<dyn LockStore>,
    flags: Arc<dyn ProcessingFlagStore>,
    queue: Arc<dyn PendingQueueStore>,
    games: Connection,
}

fn open_stores(config: &TurnstileConfig) -> anyhow::Result<Stores> {
    let limits = QueueLimits::from(&config.queue);
    let flag_ttl = config.store.flag_ttl();
    let path = &config.database.path;

    match config.store.backend {
        StoreBackend::Sqlite => {
            let store = Arc::new(SqliteStore::open(path, limits, flag_ttl)?);
            let locks: Arc<dyn LockStore> = store.clone();
            let flags: Arc<dyn ProcessingFlagStore> = store.clone();
            let queue: Arc<dyn PendingQueueStore> = store;
            Ok(Stores {
                locks,
                flags,
                queue,
                games: db::open(path)?,
            })
        }
        StoreBackend::Memory => {
            warn!("memory store selected; run a single consumer process only");
            let store = Arc::new(MemoryStore::new(limits, flag_ttl));
            let locks: Arc<dyn LockStore> = store.clone();
            let flags: Arc<dyn ProcessingFlagStore> = store.clone();
            let queue: Arc<dyn PendingQueueStore> = store;
            Ok(Stores {
                locks,
                flags,
                queue,
                games: Connection::open_in_memory()?,
            })
        }
    }
}

fn game_executor<G: Game>(
    conn: Connection,
    queue: Arc<dyn PendingQueueStore>,
    config: &TurnstileConfig,
) -> anyhow::Result<Arc<dyn CommandExecutor>> {
    let games = GameStore::new(conn, G::NAME)?;
    Ok(Arc::new(GameExecutor::<G>::new(games, queue, config.bot.locale)))
}

/// Open the stream database (inbound and outbound streams share it).
pub fn open_stream(config: &TurnstileConfig) -> anyhow::Result<Arc<dyn StreamLog>> {
    let path = &config.database.path;
    ensure_parent_dir(path);
    info!(%path, "opening stream database");
    Ok(Arc::new(SqliteStreamLog::new(db::open(path)?)?))
}

/// Wire the configured bot, stores and reply stream into a processor.
pub fn build_processor(
    config: &TurnstileConfig,
    log: Arc<dyn StreamLog>,
) -> anyhow::Result<QueueProcessor> {
    let stores = open_stores(config)?;
    let executor = match config.bot.kind {
        BotKind::Guess => game_executor::<GuessGame>(stores.games, stores.queue.clone(), config)?,
        BotKind::Deduce => game_executor::<DeduceGame>(stores.games, stores.queue.clone(), config)?,
    };

    Ok(QueueProcessor::new(
        LockManager::new(stores.locks, config.lock.lease(), config.lock.renew),
        stores.flags,
        stores.queue,
        executor,
        Arc::new(OutboundPublisher::from_config(log, &config.stream)),
        Notifier::new(config.bot.locale),
        ProcessorSettings::from(config),
    ))
}

/// Consume the inbound stream until `shutdown` fires.
pub async fn run(config: TurnstileConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
    let log = open_stream(&config)?;
    let processor = Arc::new(build_processor(&config, log.clone())?);
    info!(bot = ?config.bot.kind, backend = ?config.store.backend, "processor ready");

    let consumer = StreamConsumer::connect(log, ConsumerOptions::from(&config.stream)).await?;
    consumer
        .run(shutdown, Arc::new(DispatchHandler::new(processor)))
        .await;
    Ok(())
}

/// Cancelled on Ctrl-C, or SIGTERM on Unix.
pub fn shutdown_signal() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => info!("received Ctrl-C, shutting down"),
                        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
                    }
                }
                Err(e) => {
                    warn!(error = %e, "SIGTERM handler unavailable; Ctrl-C only");
                    let _ = tokio::signal::ctrl_c().await;
                    info!("received Ctrl-C, shutting down");
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("received Ctrl-C, shutting down");
        }

        trigger.cancel();
    });

    token
}

pub fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
