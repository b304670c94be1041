//! Bridge Integration Tests
//!
//! The consumer loop running against a file database: dispatch, failure
//! handling, published results, and graceful shutdown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use claude_recall::models::settings::{ConsumerConfig, MemoryConfig, QueueConfig};
use claude_recall::services::bridge::{
    default_handlers, BroadcastEventSink, HandlerRegistry, MessageHandler, QueueConsumer,
    SearchPayload, StorePayload, MEMORY_STORE, SEARCH_RESULTS_TOPIC,
};
use claude_recall::services::memory::{MemoryStore, PatternClassifier, SearchFilters};
use claude_recall::services::queue::{DurableQueue, EnqueueRequest, QueueMessage};
use claude_recall::services::IntegrationBridge;
use claude_recall::storage::Database;
use claude_recall::{AppResult, MemoryType};
use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const Q: &str = "memory";

fn consumer_config() -> ConsumerConfig {
    ConsumerConfig {
        queue_name: Q.into(),
        worker_id: None,
        idle_backoff_min_ms: 5,
        idle_backoff_max_ms: 25,
        sweep_interval_secs: 30,
    }
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn test_consumer_stores_queued_memories() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(&dir.path().join("recall.db")).unwrap();
    let store = MemoryStore::new(db.clone(), MemoryConfig::default());
    let queue = DurableQueue::new(db, QueueConfig::default());
    let bridge = IntegrationBridge::new(
        queue.clone(),
        store.clone(),
        Arc::new(PatternClassifier::new()),
        Q,
    );

    bridge
        .enqueue_store(StorePayload::new(MemoryType::Devops, "deploy with fly.io"))
        .unwrap();
    let mut correction = StorePayload::new(MemoryType::Correction, "use rg instead of grep");
    correction.extra.insert("tool".into(), json!("Bash"));
    bridge.enqueue_store(correction).unwrap();

    let sink = BroadcastEventSink::new(16);
    let registry = Arc::new(default_handlers(store.clone(), Arc::new(sink.clone())));
    let consumer = QueueConsumer::new(queue.clone(), registry, consumer_config());

    let cancel = CancellationToken::new();
    let task = {
        let consumer = consumer.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { consumer.run(cancel).await })
    };

    wait_until(|| queue.stats(Some(Q)).unwrap().completed == 2).await;
    cancel.cancel();
    let report = task.await.unwrap();
    assert_eq!(report.acked, 2);

    let hits = store.search("grep", &SearchFilters::default()).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].record.metadata.get("tool"), Some(&json!("Bash")));
    assert_eq!(hits[0].record.metadata.get("source"), Some(&json!("queue")));
}

#[tokio::test]
async fn test_search_results_published_by_correlation_id() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(&dir.path().join("recall.db")).unwrap();
    let store = MemoryStore::new(db.clone(), MemoryConfig::default());
    let queue = DurableQueue::new(db, QueueConfig::default());
    let bridge = IntegrationBridge::new(
        queue.clone(),
        store.clone(),
        Arc::new(PatternClassifier::new()),
        Q,
    );

    bridge
        .store_now(claude_recall::services::memory::NewMemory::new(
            MemoryType::Preference,
            "Prefer tokio for async runtime",
        ))
        .unwrap();

    let sink = BroadcastEventSink::new(16);
    let mut events = sink.subscribe();
    let consumer = QueueConsumer::new(
        queue,
        Arc::new(default_handlers(store, Arc::new(sink))),
        consumer_config(),
    );

    let mut payload = SearchPayload::new("tokio runtime");
    payload.limit = Some(3);
    bridge.enqueue_search(payload, "req-7").unwrap();
    consumer.run_once().await.unwrap().unwrap();

    let event = events.recv().await.unwrap();
    assert_eq!(event.topic, SEARCH_RESULTS_TOPIC);
    assert_eq!(event.correlation_id.as_deref(), Some("req-7"));
    let results = event.payload["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["record"]["type"], json!("preference"));
}

#[tokio::test]
async fn test_malformed_payload_is_dead_lettered_after_retries() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(&dir.path().join("recall.db")).unwrap();
    let store = MemoryStore::new(db.clone(), MemoryConfig::default());
    let queue = DurableQueue::new(
        db,
        QueueConfig {
            backoff_base_ms: 0,
            backoff_max_ms: 0,
            ..QueueConfig::default()
        },
    );
    queue
        .enqueue(
            EnqueueRequest::new(Q, MEMORY_STORE, json!({"type": "devops"})).with_max_retries(2),
        )
        .unwrap();

    let consumer = QueueConsumer::new(
        queue.clone(),
        Arc::new(default_handlers(store, Arc::new(BroadcastEventSink::new(1)))),
        consumer_config(),
    );
    while consumer.run_once().await.unwrap().is_some() {}

    let letters = queue.list_dead_letters(5).unwrap();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].attempts, 2);
    assert!(letters[0].error_message.contains("malformed"));
}

/// Takes a while per message so shutdown lands mid-stream
struct SlowHandler {
    handled: Arc<AtomicUsize>,
}

#[async_trait]
impl MessageHandler for SlowHandler {
    fn message_type(&self) -> &'static str {
        "test:slow"
    }

    async fn handle(&self, _message: &QueueMessage) -> AppResult<()> {
        tokio::time::sleep(Duration::from_millis(30)).await;
        self.handled.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn test_graceful_shutdown_leaves_nothing_processing() {
    let dir = TempDir::new().unwrap();
    let queue = DurableQueue::new(
        Database::open(&dir.path().join("recall.db")).unwrap(),
        QueueConfig::default(),
    );
    for i in 0..20 {
        queue
            .enqueue(EnqueueRequest::new(Q, "test:slow", json!({"n": i})))
            .unwrap();
    }

    let handled = Arc::new(AtomicUsize::new(0));
    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(SlowHandler {
        handled: Arc::clone(&handled),
    }));
    let consumer = QueueConsumer::new(queue.clone(), Arc::new(registry), consumer_config());

    let cancel = CancellationToken::new();
    let task = {
        let consumer = consumer.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { consumer.run(cancel).await })
    };

    wait_until(|| handled.load(Ordering::SeqCst) >= 3).await;
    cancel.cancel();
    let report = task.await.unwrap();

    let stats = queue.stats(Some(Q)).unwrap();
    assert_eq!(stats.processing, 0);
    assert_eq!(stats.completed, report.acked);
    assert!(stats.pending > 0, "shutdown should stop before draining everything");
    assert_eq!(stats.pending + stats.completed, 20);
}
