//! Stats & Compaction Manager
//!
//! Reports how full the memory store is and keeps it within bounds. Usage is
//! the larger of record count against `max_memories` and database size
//! against the compaction threshold. Warnings are informational and never
//! block writes.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::models::settings::MaintenanceConfig;
use crate::services::memory::{
    CompactionReport, MemoryMaintenance, MemoryStore, PruneCriteria, PruneReport,
};
use crate::services::queue::{DurableQueue, QueueStats};
use crate::utils::error::AppResult;
use crate::utils::task::run_blocking;

/// How close the store is to its limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageLevel {
    Normal,
    Warning,
    Critical,
}

/// Snapshot of store and queue usage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsReport {
    pub total: usize,
    pub active: usize,
    pub superseded: usize,
    pub by_type: BTreeMap<String, usize>,
    pub max_memories: usize,
    pub memory_percent: f32,
    pub db_size_bytes: u64,
    pub reclaimable_bytes: u64,
    pub compaction_threshold_bytes: u64,
    pub size_percent: f32,
    pub level: UsageLevel,
    pub queue: QueueStats,
}

impl StatsReport {
    pub fn usage_percent(&self) -> f32 {
        self.memory_percent.max(self.size_percent)
    }

    pub fn over_memory_limit(&self) -> bool {
        self.total >= self.max_memories
    }

    pub fn over_size_limit(&self) -> bool {
        self.db_size_bytes > self.compaction_threshold_bytes
    }
}

/// Result of one maintenance pass
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceReport {
    pub before: StatsReport,
    pub prune: PruneReport,
    pub compaction: Option<CompactionReport>,
    pub purged_messages: usize,
    pub after: StatsReport,
}

fn percent(used: f64, limit: f64) -> f32 {
    if limit <= 0.0 {
        return 0.0;
    }
    (used / limit * 100.0) as f32
}

/// Computes usage and runs prune, compaction and queue cleanup
#[derive(Clone)]
pub struct StatsManager {
    store: MemoryStore,
    queue: DurableQueue,
    config: MaintenanceConfig,
}

impl StatsManager {
    pub fn new(store: MemoryStore, queue: DurableQueue, config: MaintenanceConfig) -> Self {
        Self {
            store,
            queue,
            config,
        }
    }

    fn level_for(&self, usage_percent: f32) -> UsageLevel {
        if usage_percent >= self.config.critical_percent {
            UsageLevel::Critical
        } else if usage_percent >= self.config.warn_percent {
            UsageLevel::Warning
        } else {
            UsageLevel::Normal
        }
    }

    /// Compute current usage without logging
    pub fn snapshot(&self) -> AppResult<StatsReport> {
        let memory_config = self.store.config();
        let stats = self.store.stats()?;
        let storage = self.store.database().storage_stats()?;
        let queue = self.queue.stats(None)?;

        let memory_percent = percent(stats.total as f64, memory_config.max_memories as f64);
        let size_percent = percent(
            storage.size_bytes() as f64,
            memory_config.compaction_size_threshold_bytes as f64,
        );

        Ok(StatsReport {
            total: stats.total,
            active: stats.active,
            superseded: stats.superseded,
            by_type: stats.by_type,
            max_memories: memory_config.max_memories,
            memory_percent,
            db_size_bytes: storage.size_bytes(),
            reclaimable_bytes: storage.reclaimable_bytes(),
            compaction_threshold_bytes: memory_config.compaction_size_threshold_bytes,
            size_percent,
            level: self.level_for(memory_percent.max(size_percent)),
            queue,
        })
    }

    /// Compute usage and log a warning when a threshold is crossed
    pub fn check(&self) -> AppResult<StatsReport> {
        let report = self.snapshot()?;
        match report.level {
            UsageLevel::Critical => tracing::warn!(
                usage_percent = report.usage_percent(),
                total = report.total,
                max_memories = report.max_memories,
                db_size_bytes = report.db_size_bytes,
                "memory store critically full"
            ),
            UsageLevel::Warning => tracing::warn!(
                usage_percent = report.usage_percent(),
                total = report.total,
                max_memories = report.max_memories,
                db_size_bytes = report.db_size_bytes,
                "memory store nearing capacity"
            ),
            UsageLevel::Normal => tracing::debug!(
                usage_percent = report.usage_percent(),
                total = report.total,
                "memory store usage"
            ),
        }
        Ok(report)
    }

    /// Prune, compact when needed, and purge old completed queue messages.
    ///
    /// Pruning always runs so per-type caps hold; its ceiling pass only acts
    /// once the store is over `max_memories`. Compaction follows when the
    /// file is over its size threshold or pruning freed rows.
    pub fn run_maintenance(&self) -> AppResult<MaintenanceReport> {
        let before = self.check()?;

        let prune = self.store.prune(&PruneCriteria::default())?;

        let compaction = if before.over_size_limit() || prune.deleted > 0 {
            Some(MemoryMaintenance::compact(self.store.database())?)
        } else {
            None
        };

        let purged_messages = self.queue.purge_expired()?;
        let after = self.snapshot()?;

        tracing::info!(
            pruned = prune.deleted,
            compacted = compaction.is_some(),
            purged_messages,
            total = after.total,
            usage_percent = after.usage_percent(),
            "maintenance complete"
        );

        Ok(MaintenanceReport {
            before,
            prune,
            compaction,
            purged_messages,
            after,
        })
    }

    /// Run `run_maintenance` every `interval_secs` until `cancel` fires.
    /// Returns `None` when maintenance is disabled.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        if !self.config.enabled {
            tracing::info!("periodic maintenance disabled");
            return None;
        }
        let period = Duration::from_secs(self.config.interval_secs.max(1));

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let manager = Arc::clone(&self);
                if let Err(e) = run_blocking(move || manager.run_maintenance()).await {
                    tracing::warn!(error = %e, "maintenance pass failed");
                }
            }
            tracing::debug!("maintenance task stopped");
        }))
    }
}
