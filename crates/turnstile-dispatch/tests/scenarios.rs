use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::Connection;
use turnstile_core::{
    now_millis, DequeueResult, EnqueueResult, InboundMessage, OutboundKind, OutboundMessage,
    PendingMessage, SessionId,
};
use turnstile_dispatch::{
    CommandExecutor, DispatchHandler, DispatchOutcome, DomainError, DrainReport, ExecError,
    Notifier, ProcessorSettings, QueueProcessor,
};
use turnstile_store::{
    LockManager, LockStore, MemoryStore, PendingQueueStore, ProcessingFlagStore, QueueLimits,
    StoreError,
};
use turnstile_stream::{
    codec, EntryHandler, OutboundPublisher, OutboundSink, SqliteStreamLog, StreamConsumer,
    StreamEntry, StreamLog,
};
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RecordingSink {
    sent: Mutex<Vec<OutboundMessage>>,
}

impl RecordingSink {
    fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }

    fn texts(&self, kind: OutboundKind) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|m| m.kind == kind)
            .map(|m| m.text)
            .collect()
    }
}

#[async_trait]
impl OutboundSink for RecordingSink {
    async fn publish(&self, msg: &OutboundMessage) -> turnstile_stream::Result<()> {
        self.sent.lock().unwrap().push(msg.clone());
        Ok(())
    }
}

/// Echoes the content back after an optional delay. `panic`, `bad` and
/// `slow` trigger the corresponding failure modes; `/help` skips the lock.
#[derive(Default)]
struct ScriptedExecutor {
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    ran: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    fn ran(&self) -> Vec<String> {
        self.ran.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    fn requires_serialization(&self, content: &str) -> bool {
        content != "/help"
    }

    async fn execute(
        &self,
        _session: &SessionId,
        msg: &PendingMessage,
    ) -> Result<Option<String>, ExecError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.ran.lock().unwrap().push(msg.user_id.clone());

        let delay = if msg.content == "slow" {
            Duration::from_millis(500)
        } else {
            self.delay
        };
        tokio::time::sleep(delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match msg.content.as_str() {
            "panic" => panic!("executor blew up"),
            "bad" => Err(DomainError::expected("bad_input", "That is not a valid move.").into()),
            other => Ok(Some(format!("done: {other}"))),
        }
    }
}

/// Lock store that refuses chosen acquisition attempts (1-based), optionally
/// refilling the queue at that moment to simulate a concurrent arrival.
struct ScriptedLocks {
    inner: Arc<MemoryStore>,
    attempts: AtomicUsize,
    deny: HashSet<usize>,
    fill_on_deny: Option<(SessionId, PendingMessage)>,
}

impl ScriptedLocks {
    fn denying(inner: Arc<MemoryStore>, deny: &[usize]) -> Self {
        Self {
            inner,
            attempts: AtomicUsize::new(0),
            deny: deny.iter().copied().collect(),
            fill_on_deny: None,
        }
    }
}

#[async_trait]
impl LockStore for ScriptedLocks {
    async fn try_acquire(
        &self,
        session: &SessionId,
        token: &str,
        holder: &str,
        lease: Duration,
    ) -> turnstile_store::error::Result<bool> {
        let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.deny.contains(&n) {
            if let Some((chat, late)) = &self.fill_on_deny {
                self.inner.enqueue(chat, late).await?;
            }
            return Ok(false);
        }
        self.inner.try_acquire(session, token, holder, lease).await
    }

    async fn renew(
        &self,
        session: &SessionId,
        token: &str,
        lease: Duration,
    ) -> turnstile_store::error::Result<bool> {
        self.inner.renew(session, token, lease).await
    }

    async fn release(&self, session: &SessionId, token: &str) -> turnstile_store::error::Result<bool> {
        self.inner.release(session, token).await
    }

    async fn holder(&self, session: &SessionId) -> turnstile_store::error::Result<Option<String>> {
        self.inner.holder(session).await
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    executor: Arc<ScriptedExecutor>,
    sink: Arc<RecordingSink>,
    processor: Arc<QueueProcessor>,
}

fn settings() -> ProcessorSettings {
    ProcessorSettings {
        max_drain_iterations: 10,
        exec_timeout: Duration::from_secs(5),
        message_limit: 4000,
    }
}

fn harness_with(
    store: Arc<MemoryStore>,
    locks: Arc<dyn LockStore>,
    executor: ScriptedExecutor,
    settings: ProcessorSettings,
) -> Harness {
    let executor = Arc::new(executor);
    let sink = Arc::new(RecordingSink::default());
    let processor = Arc::new(QueueProcessor::new(
        LockManager::new(locks, Duration::from_secs(10), true),
        store.clone(),
        store.clone(),
        executor.clone(),
        sink.clone(),
        Notifier::default(),
        settings,
    ));
    Harness {
        store,
        executor,
        sink,
        processor,
    }
}

fn harness(max_entries: usize) -> Harness {
    let store = Arc::new(MemoryStore::new(
        QueueLimits::new(max_entries, Duration::from_secs(60)),
        Duration::from_secs(60),
    ));
    harness_with(store.clone(), store, ScriptedExecutor::default(), settings())
}

fn chat() -> SessionId {
    SessionId::from("room-1")
}

fn inbound(user: &str, content: &str) -> InboundMessage {
    InboundMessage {
        session_id: chat(),
        user_id: user.to_string(),
        content: content.to_string(),
        thread_id: Some("thread-7".to_string()),
        sender: Some(user.to_uppercase()),
    }
}

fn pending(user: &str, content: &str) -> PendingMessage {
    inbound(user, content).to_pending(now_millis())
}

async fn assert_idle(h: &Harness) {
    assert_eq!(h.store.holder(&chat()).await.unwrap(), None, "lock still held");
    assert!(!h.store.is_processing(&chat()).await.unwrap(), "flag still set");
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn idle_session_executes_and_releases() {
    let h = harness(5);

    let outcome = h.processor.dispatch(&inbound("alice", "hello")).await;

    assert_eq!(
        outcome,
        DispatchOutcome::Executed {
            drain: DrainReport {
                iterations: 1,
                ..Default::default()
            }
        }
    );
    let sent = h.sink.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, OutboundKind::Final);
    assert_eq!(sent[0].text, "done: hello");
    assert_eq!(sent[0].thread_id.as_deref(), Some("thread-7"));
    assert_eq!(h.store.size(&chat()).await.unwrap(), 0);
    assert_idle(&h).await;
}

#[tokio::test]
async fn busy_session_queues_with_position() {
    let h = harness(5);
    h.store.start_processing(&chat()).await.unwrap();

    let outcome = h.processor.dispatch(&inbound("bob", "move")).await;

    assert_eq!(outcome, DispatchOutcome::Queued(EnqueueResult::Success { position: 1 }));
    let waiting = h.sink.texts(OutboundKind::Waiting);
    assert_eq!(waiting.len(), 1);
    assert!(waiting[0].contains("position 1"));
    assert!(h.executor.ran().is_empty());
    assert_eq!(h.store.size(&chat()).await.unwrap(), 1);
}

#[tokio::test]
async fn full_queue_rejects_sixth_user() {
    let h = harness(5);
    for i in 0..5 {
        h.store.enqueue(&chat(), &pending(&format!("u{i}"), "x")).await.unwrap();
    }
    h.store.start_processing(&chat()).await.unwrap();

    let outcome = h.processor.dispatch(&inbound("sixth", "x")).await;

    assert_eq!(outcome, DispatchOutcome::Queued(EnqueueResult::Full));
    assert_eq!(h.sink.texts(OutboundKind::Error).len(), 1);
    assert_eq!(h.store.size(&chat()).await.unwrap(), 5);
}

#[tokio::test]
async fn same_user_twice_while_busy_is_duplicate() {
    let h = harness(5);
    h.store.start_processing(&chat()).await.unwrap();

    h.processor.dispatch(&inbound("bob", "first")).await;
    let outcome = h.processor.dispatch(&inbound("bob", "second")).await;

    assert_eq!(outcome, DispatchOutcome::Queued(EnqueueResult::Duplicate));
    assert_eq!(h.store.size(&chat()).await.unwrap(), 1);
    assert!(h.sink.texts(OutboundKind::Error)[0].contains("already"));
}

#[tokio::test]
async fn deadline_overrun_reports_timeout_and_releases() {
    let store = Arc::new(MemoryStore::default());
    let h = harness_with(
        store.clone(),
        store,
        ScriptedExecutor::default(),
        ProcessorSettings {
            exec_timeout: Duration::from_millis(50),
            ..settings()
        },
    );

    h.processor.dispatch(&inbound("alice", "slow")).await;

    let errors = h.sink.texts(OutboundKind::Error);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("timed out"));
    assert_idle(&h).await;
}

#[tokio::test]
async fn contended_drain_requeues_and_stops() {
    let store = Arc::new(MemoryStore::default());
    // Attempt 1: alice's run. 2: bob from the queue. 3: carol, lost to a rival.
    let locks = Arc::new(ScriptedLocks::denying(store.clone(), &[3]));
    let h = harness_with(store, locks, ScriptedExecutor::default(), settings());
    h.store.enqueue(&chat(), &pending("bob", "b")).await.unwrap();
    h.store.enqueue(&chat(), &pending("carol", "c")).await.unwrap();

    let outcome = h.processor.dispatch(&inbound("alice", "a")).await;

    assert_eq!(
        outcome,
        DispatchOutcome::Executed {
            drain: DrainReport {
                iterations: 2,
                executed: 1,
                requeued: Some(EnqueueResult::Success { position: 1 }),
                ..Default::default()
            }
        }
    );
    assert_eq!(h.executor.ran(), ["alice", "bob"]);
    let left = h.store.waiting(&chat()).await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].user_id, "carol");
}

#[tokio::test]
async fn requeue_into_full_queue_tells_the_user() {
    let store = Arc::new(MemoryStore::new(
        QueueLimits::new(2, Duration::from_secs(60)),
        Duration::from_secs(60),
    ));
    let mut locks = ScriptedLocks::denying(store.clone(), &[2]);
    locks.fill_on_deny = Some((chat(), pending("dave", "d")));
    let h = harness_with(store, Arc::new(locks), ScriptedExecutor::default(), settings());
    h.store.enqueue(&chat(), &pending("bob", "b")).await.unwrap();
    h.store.enqueue(&chat(), &pending("carol", "c")).await.unwrap();

    let outcome = h.processor.dispatch(&inbound("alice", "a")).await;

    let DispatchOutcome::Executed { drain } = outcome else {
        panic!("expected execution, got {outcome:?}");
    };
    assert_eq!(drain.requeued, Some(EnqueueResult::Full));
    assert!(h
        .sink
        .texts(OutboundKind::Error)
        .iter()
        .any(|t| t.contains("queue is full")));
    assert_eq!(h.store.size(&chat()).await.unwrap(), 2);
}

#[tokio::test]
async fn lock_race_on_arrival_queues_with_holder_name() {
    let store = Arc::new(MemoryStore::default());
    store
        .try_acquire(&chat(), "rival-token", "CAROL", Duration::from_secs(10))
        .await
        .unwrap();
    let h = harness_with(store.clone(), store, ScriptedExecutor::default(), settings());

    let outcome = h.processor.dispatch(&inbound("bob", "b")).await;

    assert_eq!(outcome, DispatchOutcome::Queued(EnqueueResult::Success { position: 1 }));
    assert!(h.sink.texts(OutboundKind::Waiting)[0].contains("CAROL"));
}

#[tokio::test]
async fn drain_stops_at_iteration_cap() {
    let store = Arc::new(MemoryStore::default());
    let h = harness_with(
        store.clone(),
        store,
        ScriptedExecutor::default(),
        ProcessorSettings {
            max_drain_iterations: 3,
            ..settings()
        },
    );
    for user in ["b", "c", "d", "e"] {
        h.store.enqueue(&chat(), &pending(user, user)).await.unwrap();
    }

    let outcome = h.processor.dispatch(&inbound("a", "a")).await;

    assert_eq!(
        outcome,
        DispatchOutcome::Executed {
            drain: DrainReport {
                iterations: 3,
                executed: 3,
                backpressure: true,
                ..Default::default()
            }
        }
    );
    assert_eq!(h.store.size(&chat()).await.unwrap(), 1);
    assert_idle(&h).await;
}

#[tokio::test]
async fn corrupt_entry_is_skipped_during_drain() {
    let h = harness(5);
    h.store.enqueue(&chat(), &pending("ghost", "   ")).await.unwrap();
    h.store.enqueue(&chat(), &pending("bob", "b")).await.unwrap();

    let outcome = h.processor.dispatch(&inbound("alice", "a")).await;

    assert_eq!(
        outcome,
        DispatchOutcome::Executed {
            drain: DrainReport {
                iterations: 3,
                executed: 1,
                skipped: 1,
                ..Default::default()
            }
        }
    );
    assert_eq!(h.executor.ran(), ["alice", "bob"]);
}

#[tokio::test]
async fn panicking_executor_reports_internal_error_and_releases() {
    let h = harness(5);

    h.processor.dispatch(&inbound("alice", "panic")).await;

    let errors = h.sink.texts(OutboundKind::Error);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("went wrong"));
    assert_idle(&h).await;

    h.processor.dispatch(&inbound("alice", "again")).await;
    assert_eq!(h.sink.texts(OutboundKind::Final), ["done: again"]);
}

#[tokio::test]
async fn domain_error_text_reaches_the_user() {
    let h = harness(5);
    h.processor.dispatch(&inbound("alice", "bad")).await;
    assert_eq!(h.sink.texts(OutboundKind::Error), ["That is not a valid move."]);
}

#[tokio::test]
async fn unserialized_command_bypasses_busy_session() {
    let h = harness(5);
    h.store.start_processing(&chat()).await.unwrap();

    let outcome = h.processor.dispatch(&inbound("bob", "/help")).await;

    assert_eq!(outcome, DispatchOutcome::Immediate);
    assert_eq!(h.sink.texts(OutboundKind::Final), ["done: /help"]);
    assert_eq!(h.store.size(&chat()).await.unwrap(), 0);
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_command_per_session_at_a_time() {
    let store = Arc::new(MemoryStore::default());
    let h = harness_with(
        store.clone(),
        store,
        ScriptedExecutor::with_delay(Duration::from_millis(20)),
        settings(),
    );

    let mut tasks = Vec::new();
    for i in 0..12 {
        let processor = h.processor.clone();
        tasks.push(tokio::spawn(async move {
            processor.dispatch(&inbound(&format!("user-{i}"), "go")).await
        }));
    }
    for t in tasks {
        t.await.unwrap();
    }

    assert_eq!(h.executor.peak.load(Ordering::SeqCst), 1);
    assert!(!h.executor.ran().is_empty());
    assert_idle(&h).await;
}

// ---------------------------------------------------------------------------
// Stream wiring
// ---------------------------------------------------------------------------

#[tokio::test]
async fn malformed_entry_is_ignored_by_handler() {
    let h = harness(5);
    let handler = DispatchHandler::new(h.processor.clone());

    handler
        .handle(StreamEntry {
            id: 1,
            created_at_ms: 0,
            fields: [("chat_id".to_string(), "room-1".to_string())].into(),
        })
        .await;

    assert!(h.sink.sent().is_empty());
    assert!(h.executor.ran().is_empty());
}

#[tokio::test]
async fn consumer_to_outbound_end_to_end() {
    let log = Arc::new(SqliteStreamLog::new(Connection::open_in_memory().unwrap()).unwrap());
    let store = Arc::new(MemoryStore::default());
    let executor = Arc::new(ScriptedExecutor::default());
    let publisher = Arc::new(OutboundPublisher::new(log.clone(), "out", 100));
    let processor = Arc::new(QueueProcessor::new(
        LockManager::new(store.clone(), Duration::from_secs(10), true),
        store.clone(),
        store.clone(),
        executor,
        publisher,
        Notifier::default(),
        settings(),
    ));

    let consumer = StreamConsumer::connect(
        log.clone(),
        turnstile_stream::ConsumerOptions {
            stream: "in".into(),
            group: "bots".into(),
            consumer: "c1".into(),
            batch_size: 8,
            block: Duration::from_millis(50),
            poll_interval: Duration::from_millis(5),
            concurrency: 4,
            claim_idle: Duration::from_secs(60),
            claim_interval: Duration::from_secs(60),
            reset_on_start: false,
        },
    )
    .await
    .unwrap();
    log.append("in", &codec::inbound_to_fields(&inbound("alice", "ping")), None)
        .await
        .unwrap();

    let shutdown = CancellationToken::new();
    let run = {
        let shutdown = shutdown.clone();
        let handler: Arc<dyn EntryHandler> = Arc::new(DispatchHandler::new(processor));
        tokio::spawn(async move { consumer.run(shutdown, handler).await })
    };

    let mut reply = None;
    for _ in 0..200 {
        if let Some(entry) = log.latest("out", 1).await.unwrap().first() {
            reply = Some(codec::outbound_from_entry(entry).unwrap());
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    shutdown.cancel();
    run.await.unwrap();

    let reply = reply.expect("no reply published");
    assert_eq!(reply.kind, OutboundKind::Final);
    assert_eq!(reply.text, "done: ping");
    assert_eq!(reply.session_id, chat());
    assert_eq!(log.pending_count("in", "bots").await.unwrap(), 0);
    assert_eq!(store.size(&chat()).await.unwrap(), 0);
}

// ---------------------------------------------------------------------------
// Store failures
// ---------------------------------------------------------------------------

/// Memory store whose operations can be switched to fail one kind at a time.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    fail_lock: AtomicBool,
    fail_flag_check: AtomicBool,
    fail_enqueue: AtomicBool,
    fail_dequeue: AtomicBool,
}

fn broken(switch: &AtomicBool) -> turnstile_store::error::Result<()> {
    if switch.load(Ordering::SeqCst) {
        return Err(StoreError::Poisoned);
    }
    Ok(())
}

#[async_trait]
impl LockStore for FlakyStore {
    async fn try_acquire(
        &self,
        session: &SessionId,
        token: &str,
        holder: &str,
        lease: Duration,
    ) -> turnstile_store::error::Result<bool> {
        broken(&self.fail_lock)?;
        self.inner.try_acquire(session, token, holder, lease).await
    }

    async fn renew(
        &self,
        session: &SessionId,
        token: &str,
        lease: Duration,
    ) -> turnstile_store::error::Result<bool> {
        self.inner.renew(session, token, lease).await
    }

    async fn release(&self, session: &SessionId, token: &str) -> turnstile_store::error::Result<bool> {
        self.inner.release(session, token).await
    }

    async fn holder(&self, session: &SessionId) -> turnstile_store::error::Result<Option<String>> {
        self.inner.holder(session).await
    }
}

#[async_trait]
impl ProcessingFlagStore for FlakyStore {
    async fn start_processing(&self, session: &SessionId) -> turnstile_store::error::Result<()> {
        self.inner.start_processing(session).await
    }

    async fn finish_processing(&self, session: &SessionId) -> turnstile_store::error::Result<()> {
        self.inner.finish_processing(session).await
    }

    async fn is_processing(&self, session: &SessionId) -> turnstile_store::error::Result<bool> {
        broken(&self.fail_flag_check)?;
        self.inner.is_processing(session).await
    }
}

#[async_trait]
impl PendingQueueStore for FlakyStore {
    async fn enqueue(
        &self,
        session: &SessionId,
        msg: &PendingMessage,
    ) -> turnstile_store::error::Result<EnqueueResult> {
        broken(&self.fail_enqueue)?;
        self.inner.enqueue(session, msg).await
    }

    async fn dequeue(&self, session: &SessionId) -> turnstile_store::error::Result<DequeueResult> {
        broken(&self.fail_dequeue)?;
        self.inner.dequeue(session).await
    }

    async fn size(&self, session: &SessionId) -> turnstile_store::error::Result<usize> {
        self.inner.size(session).await
    }

    async fn waiting(&self, session: &SessionId) -> turnstile_store::error::Result<Vec<PendingMessage>> {
        self.inner.waiting(session).await
    }

    async fn clear(&self, session: &SessionId) -> turnstile_store::error::Result<usize> {
        self.inner.clear(session).await
    }
}

struct FlakyHarness {
    store: Arc<FlakyStore>,
    executor: Arc<ScriptedExecutor>,
    sink: Arc<RecordingSink>,
    processor: QueueProcessor,
}

fn flaky_harness() -> FlakyHarness {
    let store = Arc::new(FlakyStore::default());
    let executor = Arc::new(ScriptedExecutor::default());
    let sink = Arc::new(RecordingSink::default());
    let processor = QueueProcessor::new(
        LockManager::new(store.clone(), Duration::from_secs(10), false),
        store.clone(),
        store.clone(),
        executor.clone(),
        sink.clone(),
        Notifier::default(),
        settings(),
    );
    FlakyHarness {
        store,
        executor,
        sink,
        processor,
    }
}

fn assert_unavailable(sink: &RecordingSink) {
    let errors = sink.texts(OutboundKind::Error);
    assert_eq!(errors.len(), 1, "expected one error reply, got {errors:?}");
    assert!(errors[0].contains("temporarily unavailable"));
}

#[tokio::test]
async fn lock_store_failure_tells_user_and_later_dispatch_works() {
    let h = flaky_harness();
    h.store.fail_lock.store(true, Ordering::SeqCst);

    let outcome = h.processor.dispatch(&inbound("alice", "hello")).await;

    assert_eq!(outcome, DispatchOutcome::StoreFailure);
    assert_unavailable(&h.sink);
    assert!(h.executor.ran().is_empty());
    assert_eq!(h.store.inner.holder(&chat()).await.unwrap(), None);

    h.store.fail_lock.store(false, Ordering::SeqCst);
    let outcome = h.processor.dispatch(&inbound("alice", "again")).await;
    assert!(matches!(outcome, DispatchOutcome::Executed { .. }));
    assert_eq!(h.sink.texts(OutboundKind::Final), ["done: again"]);
    assert_eq!(h.store.inner.holder(&chat()).await.unwrap(), None);
}

#[tokio::test]
async fn enqueue_failure_while_busy_tells_user() {
    let h = flaky_harness();
    h.store.inner.start_processing(&chat()).await.unwrap();
    h.store.fail_enqueue.store(true, Ordering::SeqCst);

    let outcome = h.processor.dispatch(&inbound("bob", "move")).await;

    assert_eq!(outcome, DispatchOutcome::StoreFailure);
    assert_unavailable(&h.sink);
    assert_eq!(h.store.inner.size(&chat()).await.unwrap(), 0);
    assert!(h.executor.ran().is_empty());
}

#[tokio::test]
async fn failed_flag_check_is_treated_as_idle() {
    let h = flaky_harness();
    h.store.fail_flag_check.store(true, Ordering::SeqCst);

    let outcome = h.processor.dispatch(&inbound("alice", "hello")).await;

    assert!(matches!(outcome, DispatchOutcome::Executed { .. }));
    assert_eq!(h.executor.ran(), ["alice"]);
    assert_eq!(h.sink.texts(OutboundKind::Final), ["done: hello"]);
    assert!(!h.store.inner.is_processing(&chat()).await.unwrap());
    assert_eq!(h.store.inner.holder(&chat()).await.unwrap(), None);
}

#[tokio::test]
async fn dequeue_failure_stops_the_drain() {
    let h = flaky_harness();
    h.store.inner.enqueue(&chat(), &pending("bob", "b")).await.unwrap();
    h.store.inner.enqueue(&chat(), &pending("carol", "c")).await.unwrap();
    h.store.fail_dequeue.store(true, Ordering::SeqCst);

    let outcome = h.processor.dispatch(&inbound("alice", "a")).await;

    assert_eq!(
        outcome,
        DispatchOutcome::Executed {
            drain: DrainReport {
                iterations: 1,
                ..Default::default()
            }
        }
    );
    assert_eq!(h.executor.ran(), ["alice"]);
    assert_eq!(h.store.inner.size(&chat()).await.unwrap(), 2);
    assert_eq!(h.store.inner.holder(&chat()).await.unwrap(), None);

    // Once the store recovers, the next command drains the backlog.
    h.store.fail_dequeue.store(false, Ordering::SeqCst);
    h.processor.dispatch(&inbound("dave", "d")).await;
    assert_eq!(h.executor.ran(), ["alice", "dave", "bob", "carol"]);
    assert_eq!(h.store.inner.size(&chat()).await.unwrap(), 0);
}
