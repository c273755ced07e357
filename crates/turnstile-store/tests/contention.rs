//! Several `SqliteStore` instances sharing one database file behave like
//! independent consumer processes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use turnstile_core::{now_millis, EnqueueResult, PendingMessage, SessionId};
use turnstile_store::{LockManager, PendingQueueStore, QueueLimits, SqliteStore};

fn open_many(dir: &tempfile::TempDir, n: usize, max_entries: usize) -> Vec<Arc<SqliteStore>> {
    let path = dir.path().join("shared.db");
    let path = path.to_str().unwrap();
    (0..n)
        .map(|_| {
            Arc::new(
                SqliteStore::open(
                    path,
                    QueueLimits::new(max_entries, Duration::from_secs(60)),
                    Duration::from_secs(5),
                )
                .unwrap(),
            )
        })
        .collect()
}

fn pending(user: &str) -> PendingMessage {
    PendingMessage {
        user_id: user.to_string(),
        content: "hello".to_string(),
        thread_id: None,
        sender: Some(user.to_uppercase()),
        enqueued_at_ms: now_millis(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn lock_is_mutually_exclusive_across_connections() {
    let dir = tempfile::tempdir().unwrap();
    let stores = open_many(&dir, 4, 5);
    let chat = SessionId::from("chat-shared");

    let inside = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));
    let entered = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for (i, store) in stores.into_iter().enumerate() {
        for round in 0..5 {
            let locks = LockManager::new(store.clone(), Duration::from_secs(10), false);
            let chat = chat.clone();
            let inside = inside.clone();
            let max_seen = max_seen.clone();
            let entered = entered.clone();
            tasks.push(tokio::spawn(async move {
                let _ = locks
                    .with_lock(&chat, &format!("worker-{i}-{round}"), || async {
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        entered.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        inside.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await;
            }));
        }
    }
    for t in tasks {
        t.await.unwrap();
    }

    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    assert!(entered.load(Ordering::SeqCst) >= 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn bound_holds_under_concurrent_enqueue_from_many_connections() {
    let dir = tempfile::tempdir().unwrap();
    let stores = open_many(&dir, 4, 5);
    let chat = SessionId::from("chat-shared");

    let mut tasks = Vec::new();
    for i in 0..16 {
        let store = stores[i % stores.len()].clone();
        let chat = chat.clone();
        tasks.push(tokio::spawn(async move {
            store.enqueue(&chat, &pending(&format!("user-{i}"))).await.unwrap()
        }));
    }

    let mut accepted = 0;
    let mut full = 0;
    for t in tasks {
        match t.await.unwrap() {
            EnqueueResult::Success { .. } => accepted += 1,
            EnqueueResult::Full => full += 1,
            EnqueueResult::Duplicate => panic!("distinct users must not collide"),
        }
    }
    assert_eq!(accepted, 5);
    assert_eq!(full, 11);
    assert_eq!(stores[0].size(&chat).await.unwrap(), 5);
}

#[tokio::test]
async fn duplicate_is_seen_from_another_connection() {
    let dir = tempfile::tempdir().unwrap();
    let stores = open_many(&dir, 2, 5);
    let chat = SessionId::from("chat-shared");

    assert_eq!(
        stores[0].enqueue(&chat, &pending("alice")).await.unwrap(),
        EnqueueResult::Success { position: 1 }
    );
    assert_eq!(
        stores[1].enqueue(&chat, &pending("alice")).await.unwrap(),
        EnqueueResult::Duplicate
    );

    let details = stores[1].queue_details(&chat).await.unwrap();
    assert_eq!(details.len(), 1);
    assert_eq!(details.entries[0].name, "ALICE");
}
