//! Integration Bridge
//!
//! Connects the assistant's hooks to the memory store. Producers enqueue
//! typed messages; a `QueueConsumer` drains them through registered
//! handlers. `store_now` and `search_now` bypass the queue for callers that
//! need the answer immediately.
//!
//! ## Module Structure
//!
//! - `messages` - Message type names, typed payloads, hook events
//! - `handlers` - `MessageHandler`, `EventSink`, and the built-in handlers
//! - `consumer` - Cancellable claim/handle/settle loop

pub mod consumer;
pub mod handlers;
pub mod messages;

use std::sync::Arc;

use serde_json::Value;

use claude_recall_core::Classifier;

use crate::services::memory::{MemoryStore, NewMemory, RankedMemory, SearchFilters, StoreOutcome};
use crate::services::queue::{DurableQueue, EnqueueRequest};
use crate::utils::error::AppResult;

pub use consumer::{default_worker_id, ConsumerReport, ProcessOutcome, QueueConsumer};
pub use handlers::{
    default_handlers, BroadcastEventSink, ClassifyResultHandler, EventSink, HandlerRegistry,
    MessageHandler, SearchHandler, StoreHandler, TracingEventSink,
};
pub use messages::{
    BridgeEvent, BridgeMessage, ClassifyResultPayload, HookEvent, HookInput, SearchPayload,
    StorePayload, ToolEvent, FACT_CLASSIFY_RESULT, MEMORY_SEARCH, MEMORY_STORE, SEARCH_RESULTS_TOPIC,
};

/// Producer-side facade over the queue and the store
#[derive(Clone)]
pub struct IntegrationBridge {
    queue: DurableQueue,
    store: MemoryStore,
    classifier: Arc<dyn Classifier>,
    queue_name: String,
}

impl IntegrationBridge {
    pub fn new(
        queue: DurableQueue,
        store: MemoryStore,
        classifier: Arc<dyn Classifier>,
        queue_name: impl Into<String>,
    ) -> Self {
        Self {
            queue,
            store,
            classifier,
            queue_name: queue_name.into(),
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Enqueue any bridge message on the bridge's queue
    pub fn enqueue(
        &self,
        message: &BridgeMessage,
        priority: Option<i32>,
        correlation_id: Option<String>,
    ) -> AppResult<String> {
        let mut request =
            EnqueueRequest::new(&self.queue_name, message.message_type(), message.to_payload()?);
        request.priority = priority;
        request.correlation_id = correlation_id;
        self.queue.enqueue(request)
    }

    /// Queue a `memory:store`
    pub fn enqueue_store(&self, payload: StorePayload) -> AppResult<String> {
        self.enqueue(&BridgeMessage::Store(payload), None, None)
    }

    /// Queue a `memory:search`; results are published under `correlation_id`
    pub fn enqueue_search(
        &self,
        payload: SearchPayload,
        correlation_id: impl Into<String>,
    ) -> AppResult<String> {
        self.enqueue(&BridgeMessage::Search(payload), None, Some(correlation_id.into()))
    }

    /// Queue a `fact:classify-result`
    pub fn enqueue_facts(&self, payload: ClassifyResultPayload) -> AppResult<String> {
        self.enqueue(&BridgeMessage::ClassifyResult(payload), None, None)
    }

    /// Classify a hook's prompt and queue the facts found in it.
    ///
    /// Best effort: a hook must never fail because of memory capture, so
    /// every problem is logged and `None` returned. Also returns `None` when
    /// the prompt is blank or yields no facts.
    pub fn capture_prompt(&self, event: &HookEvent) -> Option<String> {
        let Some(text) = event.text() else {
            tracing::trace!("hook event without prompt text ignored");
            return None;
        };

        let facts = self.classifier.classify(text);
        if facts.is_empty() {
            return None;
        }

        let mut extra = event.extra.clone();
        extra.insert("source".into(), Value::String("prompt-hook".into()));

        let payload = ClassifyResultPayload {
            facts,
            project_id: event.project_id.clone(),
            session_id: event.session_id.clone(),
            source_text: Some(text.to_string()),
            extra,
        };
        let fact_count = payload.facts.len();

        match self.enqueue_facts(payload) {
            Ok(id) => {
                tracing::debug!(message_id = %id, facts = fact_count, "captured prompt");
                Some(id)
            }
            Err(e) => {
                tracing::warn!(error = %e, "prompt capture failed");
                None
            }
        }
    }

    /// Queue a `tool-use` record for a tool invocation. Best effort, like
    /// `capture_prompt`.
    pub fn capture_tool_event(&self, event: &ToolEvent) -> Option<String> {
        let Some(payload) = event.clone().into_store_payload() else {
            tracing::trace!("tool event without a tool name ignored");
            return None;
        };

        match self.enqueue_store(payload) {
            Ok(id) => {
                tracing::debug!(message_id = %id, tool = %event.tool_name, "captured tool use");
                Some(id)
            }
            Err(e) => {
                tracing::warn!(error = %e, tool = %event.tool_name, "tool capture failed");
                None
            }
        }
    }

    /// Route any hook input to the matching capture path
    pub fn capture(&self, input: &HookInput) -> Option<String> {
        match input {
            HookInput::Tool(event) => self.capture_tool_event(event),
            HookInput::Prompt(event) => self.capture_prompt(event),
        }
    }

    /// Store synchronously, bypassing the queue
    pub fn store_now(&self, memory: NewMemory) -> AppResult<StoreOutcome> {
        self.store.store(memory)
    }

    /// Search synchronously, bypassing the queue
    pub fn search_now(&self, query: &str, filters: &SearchFilters) -> AppResult<Vec<RankedMemory>> {
        self.store.search(query, filters)
    }

    /// Summary of what a hook would inject: the project's active rules
    pub fn rules_context(&self, project_id: Option<&str>) -> AppResult<Value> {
        let rules = self.store.load_rules(project_id)?;
        Ok(serde_json::to_value(rules)?)
    }
}
