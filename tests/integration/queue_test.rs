//! Durable Queue Integration Tests
//!
//! Queue semantics across separate connection pools on one database file,
//! standing in for separate processes.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use claude_recall::models::settings::QueueConfig;
use claude_recall::services::queue::{
    DurableQueue, EnqueueRequest, MessageStatus, NackOutcome, LOST_MESSAGE_ERROR,
};
use claude_recall::storage::Database;
use claude_recall::AppError;
use serde_json::json;
use tempfile::TempDir;

const Q: &str = "memory";

fn open_queue(path: &Path, config: QueueConfig) -> DurableQueue {
    DurableQueue::new(Database::open(path).unwrap(), config)
}

fn fast_retry() -> QueueConfig {
    QueueConfig {
        backoff_base_ms: 0,
        backoff_max_ms: 0,
        ..QueueConfig::default()
    }
}

#[test]
fn test_priority_order_across_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("recall.db");
    {
        let queue = open_queue(&path, QueueConfig::default());
        for priority in [1, 5, 3] {
            queue
                .enqueue(
                    EnqueueRequest::new(Q, "memory:store", json!({"priority": priority}))
                        .with_priority(priority),
                )
                .unwrap();
        }
    }

    let queue = open_queue(&path, QueueConfig::default());
    let order: Vec<i32> = std::iter::from_fn(|| queue.claim(Q, "w").unwrap())
        .map(|m| m.priority)
        .collect();
    assert_eq!(order, vec![5, 3, 1]);
}

#[test]
fn test_crashed_worker_message_is_recovered() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("recall.db");

    let id = {
        let crashed = open_queue(&path, QueueConfig::default());
        let id = crashed
            .enqueue(EnqueueRequest::new(Q, "memory:store", json!({"content": "x"})))
            .unwrap();
        crashed.claim(Q, "crashed-worker").unwrap().unwrap();
        id
        // pool dropped without ack: the process "died"
    };

    let survivor = open_queue(&path, QueueConfig::default());
    assert!(survivor.claim(Q, "survivor").unwrap().is_none());

    let report = survivor
        .sweep_orphans_older_than(Duration::ZERO)
        .unwrap();
    assert_eq!(report.requeued, 1);

    let message = survivor.claim(Q, "survivor").unwrap().unwrap();
    assert_eq!(message.id, id);
    assert_eq!(message.attempts, 0);
    assert_eq!(message.last_error.as_deref(), Some(LOST_MESSAGE_ERROR));
    survivor.ack(&message).unwrap();
    assert_eq!(
        survivor.get(&id).unwrap().unwrap().status,
        MessageStatus::Completed
    );
}

#[test]
fn test_retry_then_dead_letter_counts() {
    let dir = TempDir::new().unwrap();
    let queue = open_queue(&dir.path().join("recall.db"), fast_retry());
    let id = queue
        .enqueue(
            EnqueueRequest::new(Q, "memory:store", json!({"content": "x"})).with_max_retries(3),
        )
        .unwrap();

    let mut outcomes = Vec::new();
    while let Some(message) = queue.claim(Q, "w").unwrap() {
        outcomes.push(queue.nack(&message, "store unavailable").unwrap());
    }

    assert_eq!(outcomes.len(), 3);
    assert!(matches!(outcomes[0], NackOutcome::Retrying { attempts: 1, .. }));
    assert!(matches!(outcomes[1], NackOutcome::Retrying { attempts: 2, .. }));
    assert!(matches!(outcomes[2], NackOutcome::DeadLettered { attempts: 3, .. }));

    let stats = queue.stats(Some(Q)).unwrap();
    assert_eq!(stats.dead, 1);
    assert_eq!(stats.dead_letters, 1);
    assert_eq!(stats.in_flight(), 0);

    let letters = queue.list_dead_letters(10).unwrap();
    assert_eq!(letters[0].original_message_id, id);
    assert_eq!(letters[0].original_queue_name, Q);
}

#[test]
fn test_two_pools_never_claim_the_same_message() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("recall.db");
    let total = 60;

    {
        let queue = open_queue(&path, QueueConfig::default());
        for i in 0..total {
            queue
                .enqueue(EnqueueRequest::new(Q, "memory:store", json!({"n": i})))
                .unwrap();
        }
    }

    let workers = 2;
    let barrier = Arc::new(Barrier::new(workers));
    let handles: Vec<_> = (0..workers)
        .map(|w| {
            let path = path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let queue = open_queue(&path, QueueConfig::default());
                let worker = format!("worker-{}", w);
                barrier.wait();
                let mut claimed = Vec::new();
                while let Some(message) = queue.claim(Q, &worker).unwrap() {
                    assert_eq!(message.claimed_by.as_deref(), Some(worker.as_str()));
                    queue.ack(&message).unwrap();
                    claimed.push(message.id);
                }
                claimed
            })
        })
        .collect();

    let results: Vec<Vec<String>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let mut seen = HashSet::new();
    for id in results.iter().flatten() {
        assert!(seen.insert(id.clone()), "message {} claimed twice", id);
    }
    assert_eq!(seen.len(), total);

    let queue = open_queue(&path, QueueConfig::default());
    assert_eq!(queue.stats(Some(Q)).unwrap().completed, total as u64);
}

#[test]
fn test_retrying_message_visible_to_other_pool_when_due() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("recall.db");
    let a = open_queue(&path, fast_retry());
    let b = open_queue(&path, fast_retry());

    let id = a
        .enqueue(EnqueueRequest::new(Q, "memory:search", json!({"query": "q"})))
        .unwrap();
    let claimed = a.claim(Q, "a").unwrap().unwrap();
    a.nack(&claimed, "transient").unwrap();

    let reclaimed = b.claim(Q, "b").unwrap().unwrap();
    assert_eq!(reclaimed.id, id);
    assert_eq!(reclaimed.claimed_by.as_deref(), Some("b"));
    assert_eq!(reclaimed.attempts, 1);
}

#[test]
fn test_repeated_crashes_never_dead_letter() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("recall.db");
    let queue = open_queue(&path, QueueConfig::default());
    let id = queue
        .enqueue(EnqueueRequest::new(Q, "memory:store", json!({})).with_max_retries(1))
        .unwrap();

    for round in 0..3 {
        let worker = format!("crashed-{}", round);
        assert!(queue.claim(Q, &worker).unwrap().is_some());
        queue.sweep_orphans_older_than(Duration::ZERO).unwrap();
    }

    let message = queue.claim(Q, "survivor").unwrap().unwrap();
    assert_eq!(message.id, id);
    assert_eq!(message.attempts, 0);
    queue.ack(&message).unwrap();
    assert_eq!(queue.stats(Some(Q)).unwrap().dead_letters, 0);
}

#[test]
fn test_slow_worker_cannot_settle_reclaimed_message() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("recall.db");
    let slow = open_queue(&path, QueueConfig::default());
    let fast = open_queue(&path, QueueConfig::default());

    let id = slow
        .enqueue(EnqueueRequest::new(Q, "memory:store", json!({"content": "x"})))
        .unwrap();
    let stale = slow.claim(Q, "slow-worker").unwrap().unwrap();
    fast.sweep_orphans_older_than(Duration::ZERO).unwrap();
    let current = fast.claim(Q, "worker-b").unwrap().unwrap();
    assert_eq!(current.id, id);

    assert!(matches!(
        slow.nack(&stale, "timed out"),
        Err(AppError::StaleClaim(_))
    ));
    assert!(matches!(slow.ack(&stale), Err(AppError::StaleClaim(_))));

    fast.ack(&current).unwrap();
    let message = fast.get(&id).unwrap().unwrap();
    assert_eq!(message.status, MessageStatus::Completed);
    assert_eq!(message.attempts, 0);
}

#[test]
fn test_success_on_final_attempt_completes() {
    let dir = TempDir::new().unwrap();
    let queue = open_queue(&dir.path().join("recall.db"), fast_retry());
    let max_retries = 3;
    let id = queue
        .enqueue(
            EnqueueRequest::new(Q, "memory:store", json!({"content": "x"}))
                .with_max_retries(max_retries),
        )
        .unwrap();

    for _ in 0..max_retries - 1 {
        let message = queue.claim(Q, "w").unwrap().unwrap();
        assert!(!queue.nack(&message, "flaky").unwrap().is_dead());
    }
    let message = queue.claim(Q, "w").unwrap().unwrap();
    queue.ack(&message).unwrap();

    let message = queue.get(&id).unwrap().unwrap();
    assert_eq!(message.status, MessageStatus::Completed);
    assert_eq!(message.attempts, max_retries - 1);
    assert!(message.attempts <= message.max_retries);
    assert!(queue.list_dead_letters(10).unwrap().is_empty());
}
