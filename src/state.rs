//! Application State
//!
//! Explicitly constructed container for every service sharing one database,
//! plus the lifecycle of the background consumer and maintenance tasks.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use claude_recall_core::Classifier;

use crate::models::settings::RecallConfig;
use crate::services::bridge::{
    default_handlers, ConsumerReport, EventSink, HandlerRegistry, IntegrationBridge,
    QueueConsumer, TracingEventSink,
};
use crate::services::memory::{MemoryStore, PatternClassifier};
use crate::services::queue::DurableQueue;
use crate::services::stats::StatsManager;
use crate::storage::Database;
use crate::utils::error::{AppError, AppResult};

#[derive(Default)]
struct BackgroundTasks {
    cancel: Option<CancellationToken>,
    consumer: Option<JoinHandle<ConsumerReport>>,
    maintenance: Option<JoinHandle<()>>,
}

/// Services wired to one database
pub struct AppState {
    config: RecallConfig,
    database: Database,
    store: MemoryStore,
    queue: DurableQueue,
    bridge: IntegrationBridge,
    registry: Arc<HandlerRegistry>,
    stats: Arc<StatsManager>,
    tasks: Mutex<BackgroundTasks>,
}

impl AppState {
    /// Open the database at `db_path` with the built-in classifier and a
    /// logging event sink
    pub fn open(config: RecallConfig, db_path: &Path) -> AppResult<Self> {
        config.validate().map_err(AppError::config)?;
        let database = Database::open(db_path)?;
        Ok(Self::from_parts(
            config,
            database,
            Arc::new(PatternClassifier::new()),
            Arc::new(TracingEventSink),
        ))
    }

    /// In-memory state for tests
    pub fn in_memory(config: RecallConfig) -> AppResult<Self> {
        config.validate().map_err(AppError::config)?;
        Ok(Self::from_parts(
            config,
            Database::new_in_memory()?,
            Arc::new(PatternClassifier::new()),
            Arc::new(TracingEventSink),
        ))
    }

    /// Wire services from explicit collaborators
    pub fn from_parts(
        config: RecallConfig,
        database: Database,
        classifier: Arc<dyn Classifier>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let store = MemoryStore::new(database.clone(), config.memory.clone());
        let queue = DurableQueue::new(database.clone(), config.queue.clone());
        let bridge = IntegrationBridge::new(
            queue.clone(),
            store.clone(),
            classifier,
            config.consumer.queue_name.clone(),
        );
        let registry = Arc::new(default_handlers(store.clone(), sink));
        let stats = Arc::new(StatsManager::new(
            store.clone(),
            queue.clone(),
            config.maintenance.clone(),
        ));

        Self {
            config,
            database,
            store,
            queue,
            bridge,
            registry,
            stats,
            tasks: Mutex::new(BackgroundTasks::default()),
        }
    }

    pub fn config(&self) -> &RecallConfig {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn queue(&self) -> &DurableQueue {
        &self.queue
    }

    pub fn bridge(&self) -> &IntegrationBridge {
        &self.bridge
    }

    pub fn stats_manager(&self) -> &StatsManager {
        &self.stats
    }

    /// A consumer for the configured queue using the registered handlers
    pub fn consumer(&self) -> QueueConsumer {
        QueueConsumer::new(
            self.queue.clone(),
            Arc::clone(&self.registry),
            self.config.consumer.clone(),
        )
    }

    pub fn is_healthy(&self) -> bool {
        self.database.is_healthy()
    }

    /// Whether background tasks are running
    pub async fn is_running(&self) -> bool {
        self.tasks.lock().await.cancel.is_some()
    }

    /// Start the queue consumer and the maintenance timer. Idempotent.
    pub async fn start(&self) -> AppResult<()> {
        let mut tasks = self.tasks.lock().await;
        if tasks.cancel.is_some() {
            return Ok(());
        }

        let cancel = CancellationToken::new();
        let consumer = self.consumer();
        let worker_id = consumer.worker_id().to_string();

        let consumer_cancel = cancel.clone();
        tasks.consumer = Some(tokio::spawn(async move {
            consumer.run(consumer_cancel).await
        }));
        tasks.maintenance = Arc::clone(&self.stats).spawn(cancel.clone());
        tasks.cancel = Some(cancel);

        tracing::info!(worker = %worker_id, "claude-recall started");
        Ok(())
    }

    /// Stop background tasks and wait for them.
    ///
    /// The consumer finishes the message it holds before exiting, so nothing
    /// is left in `processing`. Returns the consumer's totals when it ran.
    pub async fn shutdown(&self) -> AppResult<Option<ConsumerReport>> {
        let mut tasks = self.tasks.lock().await;
        let Some(cancel) = tasks.cancel.take() else {
            return Ok(None);
        };
        cancel.cancel();

        let report = match tasks.consumer.take() {
            Some(handle) => Some(
                handle
                    .await
                    .map_err(|e| AppError::internal(format!("Task join error: {}", e)))?,
            ),
            None => None,
        };
        if let Some(handle) = tasks.maintenance.take() {
            handle
                .await
                .map_err(|e| AppError::internal(format!("Task join error: {}", e)))?;
        }

        if let Err(e) = self.database.checkpoint_passive() {
            tracing::warn!(error = %e, "final checkpoint failed");
        }

        tracing::info!("claude-recall stopped");
        Ok(report)
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("queue", &self.config.consumer.queue_name)
            .field("handlers", &self.registry.message_types())
            .finish()
    }
}
