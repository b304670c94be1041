//! Queue Consumer
//!
//! Long-running claim → handle → ack/nack loop. Handlers run in their own
//! task so a panic is caught and turned into a nack; no handler failure ever
//! ends the loop. Cancellation is observed only between messages, so a
//! message that was claimed is always acked or nacked before `run` returns.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::models::settings::ConsumerConfig;
use crate::services::bridge::handlers::HandlerRegistry;
use crate::services::queue::{DurableQueue, NackOutcome, QueueMessage};
use crate::utils::error::{AppError, AppResult};
use crate::utils::task::run_blocking;

/// What happened to one claimed message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Acked,
    Nacked(NackOutcome),
    /// Ack/nack itself failed; the message stays claimed until the orphan sweep
    Unsettled(String),
    /// The claim was swept and taken by another worker; the result is dropped
    Stale,
}

/// Totals for one `run` of the consumer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerReport {
    pub acked: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub unsettled: u64,
    pub stale: u64,
    /// Orphans reclaimed by periodic sweeps
    pub swept: u64,
}

impl ConsumerReport {
    pub fn processed(&self) -> u64 {
        self.acked + self.retried + self.dead_lettered + self.unsettled + self.stale
    }

    fn record(&mut self, outcome: &ProcessOutcome) {
        match outcome {
            ProcessOutcome::Acked => self.acked += 1,
            ProcessOutcome::Nacked(NackOutcome::Retrying { .. }) => self.retried += 1,
            ProcessOutcome::Nacked(NackOutcome::DeadLettered { .. }) => self.dead_lettered += 1,
            ProcessOutcome::Unsettled(_) => self.unsettled += 1,
            ProcessOutcome::Stale => self.stale += 1,
        }
    }
}

/// Generate a worker id unique to this process
pub fn default_worker_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("worker-{}-{}", std::process::id(), &suffix[..8])
}

/// Polls one queue and dispatches to registered handlers
#[derive(Clone)]
pub struct QueueConsumer {
    queue: DurableQueue,
    registry: Arc<HandlerRegistry>,
    config: ConsumerConfig,
    worker_id: String,
}

impl QueueConsumer {
    pub fn new(queue: DurableQueue, registry: Arc<HandlerRegistry>, config: ConsumerConfig) -> Self {
        let worker_id = config.worker_id.clone().unwrap_or_else(default_worker_id);
        Self {
            queue,
            registry,
            config,
            worker_id,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn queue_name(&self) -> &str {
        &self.config.queue_name
    }

    /// Run until `cancel` fires.
    ///
    /// Idle polls back off from `idle_backoff_min_ms`, doubling up to
    /// `idle_backoff_max_ms`; any claimed message resets the backoff.
    pub async fn run(&self, cancel: CancellationToken) -> ConsumerReport {
        let min_idle = Duration::from_millis(self.config.idle_backoff_min_ms.max(1));
        let max_idle = Duration::from_millis(self.config.idle_backoff_max_ms).max(min_idle);
        let sweep_interval = Duration::from_secs(self.config.sweep_interval_secs);

        let mut report = ConsumerReport::default();
        let mut idle = min_idle;
        let mut last_sweep: Option<Instant> = None;

        tracing::info!(
            worker = %self.worker_id,
            queue = %self.config.queue_name,
            handlers = ?self.registry.message_types(),
            "queue consumer started"
        );

        while !cancel.is_cancelled() {
            if last_sweep.map_or(true, |at| at.elapsed() >= sweep_interval) {
                report.swept += self.sweep().await;
                last_sweep = Some(Instant::now());
            }

            match self.run_once().await {
                Ok(Some(outcome)) => {
                    report.record(&outcome);
                    idle = min_idle;
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(worker = %self.worker_id, error = %e, "claim failed");
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(idle) => {}
            }
            idle = (idle * 2).min(max_idle);
        }

        tracing::info!(
            worker = %self.worker_id,
            acked = report.acked,
            retried = report.retried,
            dead_lettered = report.dead_lettered,
            "queue consumer stopped"
        );
        report
    }

    /// Claim and process a single message, if one is available
    pub async fn run_once(&self) -> AppResult<Option<ProcessOutcome>> {
        let queue = self.queue.clone();
        let queue_name = self.config.queue_name.clone();
        let worker_id = self.worker_id.clone();
        let claimed = run_blocking(move || queue.claim(&queue_name, &worker_id)).await?;

        match claimed {
            Some(message) => Ok(Some(self.process(message).await)),
            None => Ok(None),
        }
    }

    async fn process(&self, message: QueueMessage) -> ProcessOutcome {
        let claim = message.clone();

        let failure = match self.registry.get(&message.message_type) {
            None => Some(format!(
                "no handler registered for message type {}",
                message.message_type
            )),
            Some(handler) => {
                let task = tokio::spawn(async move { handler.handle(&message).await });
                match task.await {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => Some(e.to_string()),
                    Err(join) if join.is_panic() => Some(format!("handler panicked: {}", join)),
                    Err(join) => Some(format!("handler aborted: {}", join)),
                }
            }
        };

        let id = claim.id.clone();
        let queue = self.queue.clone();
        let result = match failure {
            None => run_blocking(move || queue.ack(&claim).map(|_| ProcessOutcome::Acked)).await,
            Some(error) => {
                tracing::warn!(message_id = %id, error = %error, "handler failed");
                run_blocking(move || queue.nack(&claim, &error).map(ProcessOutcome::Nacked)).await
            }
        };

        match result {
            Ok(outcome) => outcome,
            Err(AppError::StaleClaim(reason)) => {
                tracing::info!(
                    worker = %self.worker_id,
                    message_id = %id,
                    reason = %reason,
                    "claim was reclaimed, dropping result"
                );
                ProcessOutcome::Stale
            }
            Err(e) => {
                tracing::error!(worker = %self.worker_id, error = %e, "failed to settle message");
                ProcessOutcome::Unsettled(e.to_string())
            }
        }
    }

    async fn sweep(&self) -> u64 {
        let queue = self.queue.clone();
        match run_blocking(move || queue.sweep_orphans()).await {
            Ok(report) => report.total() as u64,
            Err(e) => {
                tracing::warn!(worker = %self.worker_id, error = %e, "orphan sweep failed");
                0
            }
        }
    }
}
