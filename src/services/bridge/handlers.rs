//! Message Handlers
//!
//! One `MessageHandler` per message type, looked up by the consumer through
//! a `HandlerRegistry`. Handlers return errors instead of acking or nacking
//! themselves; the consumer owns the queue transitions.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::broadcast;

use crate::services::bridge::messages::{
    BridgeEvent, BridgeMessage, FACT_CLASSIFY_RESULT, MEMORY_SEARCH, MEMORY_STORE,
    SEARCH_RESULTS_TOPIC,
};
use crate::services::memory::{MemoryStore, QUEUE_MESSAGE_ID_KEY};
use crate::services::queue::QueueMessage;
use crate::utils::error::{AppError, AppResult};
use crate::utils::task::run_blocking;

/// Processes one message type
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// The `messageType` this handler consumes
    fn message_type(&self) -> &'static str;

    async fn handle(&self, message: &QueueMessage) -> AppResult<()>;
}

/// Outbound pub/sub transport for handler results
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: BridgeEvent) -> AppResult<()>;
}

/// Sink that only logs; used when nobody subscribes to results
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn publish(&self, event: BridgeEvent) -> AppResult<()> {
        tracing::debug!(
            topic = %event.topic,
            correlation_id = ?event.correlation_id,
            "bridge event"
        );
        Ok(())
    }
}

/// In-process sink backed by a tokio broadcast channel
#[derive(Debug, Clone)]
pub struct BroadcastEventSink {
    sender: broadcast::Sender<BridgeEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl EventSink for BroadcastEventSink {
    async fn publish(&self, event: BridgeEvent) -> AppResult<()> {
        // no subscribers is not an error
        if self.sender.send(event).is_err() {
            tracing::trace!("bridge event dropped, no subscribers");
        }
        Ok(())
    }
}

/// Handlers keyed by message type
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn MessageHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, returning the one it replaced
    pub fn register(&mut self, handler: Arc<dyn MessageHandler>) -> Option<Arc<dyn MessageHandler>> {
        self.handlers
            .insert(handler.message_type().to_string(), handler)
    }

    pub fn get(&self, message_type: &str) -> Option<Arc<dyn MessageHandler>> {
        self.handlers.get(message_type).cloned()
    }

    pub fn message_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Provenance recorded on every memory written from the queue
fn source_metadata(message: &QueueMessage) -> Map<String, Value> {
    let mut source = Map::new();
    source.insert("source".into(), json!("queue"));
    source.insert(QUEUE_MESSAGE_ID_KEY.into(), json!(message.id));
    if let Some(ref correlation_id) = message.correlation_id {
        source.insert("correlationId".into(), json!(correlation_id));
    }
    source
}

fn unexpected(message: &QueueMessage, expected: &str) -> AppError {
    AppError::internal(format!(
        "message {} of type {} routed to {} handler",
        message.id, message.message_type, expected
    ))
}

/// `memory:store`: write one record
pub struct StoreHandler {
    store: MemoryStore,
}

impl StoreHandler {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl MessageHandler for StoreHandler {
    fn message_type(&self) -> &'static str {
        MEMORY_STORE
    }

    async fn handle(&self, message: &QueueMessage) -> AppResult<()> {
        let BridgeMessage::Store(payload) =
            BridgeMessage::decode(&message.message_type, &message.payload)?
        else {
            return Err(unexpected(message, MEMORY_STORE));
        };

        let memory = payload.into_new_memory(source_metadata(message));
        let store = self.store.clone();
        let outcome = run_blocking(move || store.store(memory)).await?;

        tracing::debug!(message_id = %message.id, memory_id = %outcome.id(), "stored memory from queue");
        Ok(())
    }
}

/// `memory:search`: rank and publish results keyed by correlation id
pub struct SearchHandler {
    store: MemoryStore,
    sink: Arc<dyn EventSink>,
}

impl SearchHandler {
    pub fn new(store: MemoryStore, sink: Arc<dyn EventSink>) -> Self {
        Self { store, sink }
    }
}

#[async_trait]
impl MessageHandler for SearchHandler {
    fn message_type(&self) -> &'static str {
        MEMORY_SEARCH
    }

    async fn handle(&self, message: &QueueMessage) -> AppResult<()> {
        let BridgeMessage::Search(payload) =
            BridgeMessage::decode(&message.message_type, &message.payload)?
        else {
            return Err(unexpected(message, MEMORY_SEARCH));
        };

        let filters = payload.filters();
        let query = payload.query.clone();
        let store = self.store.clone();
        let hits = run_blocking(move || store.search(&query, &filters)).await?;

        let count = hits.len();
        self.sink
            .publish(BridgeEvent {
                topic: SEARCH_RESULTS_TOPIC.to_string(),
                correlation_id: message.correlation_id.clone(),
                payload: json!({
                    "query": payload.query,
                    "results": hits,
                }),
            })
            .await?;

        tracing::debug!(message_id = %message.id, hits = count, "published search results");
        Ok(())
    }
}

/// `fact:classify-result`: store each classified fact above the confidence floor.
///
/// Redelivery is safe: facts already stored come back as duplicates.
pub struct ClassifyResultHandler {
    store: MemoryStore,
}

impl ClassifyResultHandler {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl MessageHandler for ClassifyResultHandler {
    fn message_type(&self) -> &'static str {
        FACT_CLASSIFY_RESULT
    }

    async fn handle(&self, message: &QueueMessage) -> AppResult<()> {
        let BridgeMessage::ClassifyResult(payload) =
            BridgeMessage::decode(&message.message_type, &message.payload)?
        else {
            return Err(unexpected(message, FACT_CLASSIFY_RESULT));
        };

        let mut metadata = payload.extra.clone();
        if let Some(ref session_id) = payload.session_id {
            metadata.insert("sessionId".into(), json!(session_id));
        }
        metadata.extend(source_metadata(message));

        let store = self.store.clone();
        let message_id = message.id.clone();
        let stored = run_blocking(move || {
            let mut stored = 0usize;
            for fact in &payload.facts {
                let outcome =
                    store.store_fact(fact, payload.project_id.as_deref(), metadata.clone())?;
                if outcome.is_some() {
                    stored += 1;
                }
            }
            Ok(stored)
        })
        .await?;

        tracing::debug!(message_id = %message_id, stored, "stored classified facts");
        Ok(())
    }
}

/// Registry with the three built-in handlers
pub fn default_handlers(store: MemoryStore, sink: Arc<dyn EventSink>) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(StoreHandler::new(store.clone())));
    registry.register(Arc::new(SearchHandler::new(store.clone(), sink)));
    registry.register(Arc::new(ClassifyResultHandler::new(store)));
    registry
}
