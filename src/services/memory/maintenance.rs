//! Memory Maintenance
//!
//! Retention pruning and physical compaction for the memory store.
//!
//! - **Retention**: bounded types keep only their N most recent active
//!   records. Unbounded types are never count-pruned.
//! - **Ceiling**: when the table holds more than the ceiling, superseded
//!   bounded-type records go first (oldest first), then active bounded-type
//!   records (oldest first) down to each type's floor. Floors are never
//!   violated; if the ceiling still cannot be met the report says so.
//! - **Compact**: incremental vacuum in small page batches, then a passive
//!   WAL checkpoint. Only meaningful after pruning has freed pages.

use std::collections::BTreeMap;

use rusqlite::{params, Transaction};
use serde::{Deserialize, Serialize};

use claude_recall_core::MemoryType;

use crate::models::settings::RetentionConfig;
use crate::services::memory::store::MemoryStore;
use crate::storage::database::Database;
use crate::utils::error::AppResult;

/// Pages returned to the filesystem per exclusive window
pub const COMPACTION_BATCH_PAGES: u32 = 256;

/// Upper bound on batches per compaction run
pub const COMPACTION_MAX_BATCHES: u32 = 4_096;

/// Options for a prune run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PruneCriteria {
    /// Override the configured `max_memories` ceiling
    pub ceiling: Option<usize>,
    /// Compute what would be deleted without deleting it
    pub dry_run: bool,
}

/// What a prune run removed (or would remove, for a dry run)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneReport {
    pub deleted: usize,
    /// Removed by per-type caps
    pub retention_deleted: usize,
    /// Superseded records removed by the ceiling pass
    pub superseded_deleted: usize,
    /// Active records removed by the ceiling pass
    pub active_deleted: usize,
    pub by_type: BTreeMap<String, usize>,
    pub remaining: usize,
    pub ceiling: usize,
    /// Floors prevented the ceiling from being met
    pub still_over_ceiling: bool,
    pub dry_run: bool,
}

impl PruneReport {
    fn record(&mut self, memory_type: &str) {
        self.deleted += 1;
        *self.by_type.entry(memory_type.to_string()).or_insert(0) += 1;
    }
}

/// Result of a compaction run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionReport {
    pub pages_released: u64,
    pub bytes_before: u64,
    pub bytes_after: u64,
}

/// A row considered by the ceiling pass
struct PruneCandidate {
    id: String,
    memory_type: String,
    updated_at: i64,
    rowid: i64,
}

/// Memory maintenance operations
pub struct MemoryMaintenance;

impl MemoryMaintenance {
    /// Apply per-type retention, then enforce the ceiling.
    ///
    /// Runs as one write transaction so counts and deletions agree even with
    /// other processes writing.
    pub fn prune(store: &MemoryStore, criteria: &PruneCriteria) -> AppResult<PruneReport> {
        let ceiling = criteria.ceiling.unwrap_or(store.config().max_memories);
        let retention = &store.config().retention;
        let dry_run = criteria.dry_run;

        let report = store
            .database()
            .write_transaction(|tx| Self::prune_in(tx, retention, ceiling, dry_run))?;

        if report.deleted > 0 {
            tracing::info!(
                deleted = report.deleted,
                remaining = report.remaining,
                ceiling = report.ceiling,
                dry_run = report.dry_run,
                "memory prune"
            );
        }
        if report.still_over_ceiling {
            tracing::warn!(
                remaining = report.remaining,
                ceiling = report.ceiling,
                "memory store still over ceiling; retention floors reached"
            );
        }

        Ok(report)
    }

    fn prune_in(
        tx: &Transaction<'_>,
        retention: &RetentionConfig,
        ceiling: usize,
        dry_run: bool,
    ) -> AppResult<PruneReport> {
        let mut report = PruneReport {
            ceiling,
            dry_run,
            ..PruneReport::default()
        };
        let mut to_delete: Vec<String> = Vec::new();

        let total: i64 = tx.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?;
        let mut remaining = total.max(0) as usize;

        // Survivors of the retention phase that the ceiling pass may still take
        let mut floor_candidates: Vec<PruneCandidate> = Vec::new();
        let bounded = retention.bounded_types();

        // Phase 1: per-type caps
        for memory_type in &bounded {
            let policy = retention.policy_for(*memory_type);
            let cap = policy.max_active.unwrap_or(usize::MAX);

            let active = Self::active_newest_first(tx, *memory_type)?;
            let mut kept = 0usize;
            let mut survivors = Vec::new();
            for candidate in active {
                if kept < cap {
                    kept += 1;
                    survivors.push(candidate);
                } else {
                    report.record(&candidate.memory_type);
                    report.retention_deleted += 1;
                    to_delete.push(candidate.id);
                    remaining -= 1;
                }
            }

            // newest `floor` survivors are untouchable
            floor_candidates.extend(survivors.into_iter().skip(policy.floor));
        }

        // Phase 2: ceiling
        if remaining > ceiling && !bounded.is_empty() {
            let superseded = Self::superseded_oldest_first(tx, &bounded)?;
            for candidate in superseded {
                if remaining <= ceiling {
                    break;
                }
                report.record(&candidate.memory_type);
                report.superseded_deleted += 1;
                to_delete.push(candidate.id);
                remaining -= 1;
            }

            if remaining > ceiling {
                floor_candidates.sort_by(|a, b| {
                    a.updated_at.cmp(&b.updated_at).then(a.rowid.cmp(&b.rowid))
                });
                for candidate in floor_candidates {
                    if remaining <= ceiling {
                        break;
                    }
                    report.record(&candidate.memory_type);
                    report.active_deleted += 1;
                    to_delete.push(candidate.id);
                    remaining -= 1;
                }
            }
        }

        report.remaining = remaining;
        report.still_over_ceiling = remaining > ceiling;

        if !dry_run && !to_delete.is_empty() {
            let mut stmt = tx.prepare("DELETE FROM memories WHERE id = ?1")?;
            for id in &to_delete {
                stmt.execute(params![id])?;
            }
        }

        Ok(report)
    }

    fn active_newest_first(
        tx: &Transaction<'_>,
        memory_type: MemoryType,
    ) -> AppResult<Vec<PruneCandidate>> {
        let mut stmt = tx.prepare(
            "SELECT id, type, updated_at, rowid FROM memories
             WHERE type = ?1 AND superseded_by IS NULL
             ORDER BY updated_at DESC, rowid DESC",
        )?;
        let rows = stmt.query_map(params![memory_type.as_str()], Self::row_to_candidate)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn superseded_oldest_first(
        tx: &Transaction<'_>,
        types: &[MemoryType],
    ) -> AppResult<Vec<PruneCandidate>> {
        if types.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders: Vec<String> = (1..=types.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "SELECT id, type, updated_at, rowid FROM memories
             WHERE superseded_by IS NOT NULL AND type IN ({})
             ORDER BY updated_at ASC, rowid ASC",
            placeholders.join(",")
        );
        let mut stmt = tx.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(types.iter().map(|t| t.as_str())),
            Self::row_to_candidate,
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn row_to_candidate(row: &rusqlite::Row) -> rusqlite::Result<PruneCandidate> {
        Ok(PruneCandidate {
            id: row.get(0)?,
            memory_type: row.get(1)?,
            updated_at: row.get(2)?,
            rowid: row.get(3)?,
        })
    }

    /// Reclaim free pages with the default batch sizes
    pub fn compact(db: &Database) -> AppResult<CompactionReport> {
        Self::compact_with(db, COMPACTION_BATCH_PAGES, COMPACTION_MAX_BATCHES)
    }

    /// Incremental vacuum in `pages_per_batch` batches, then a passive checkpoint
    pub fn compact_with(
        db: &Database,
        pages_per_batch: u32,
        max_batches: u32,
    ) -> AppResult<CompactionReport> {
        let before = db.storage_stats()?;
        let pages_released = db.incremental_vacuum(pages_per_batch, max_batches)?;
        db.checkpoint_passive()?;
        let after = db.storage_stats()?;

        let report = CompactionReport {
            pages_released,
            bytes_before: before.size_bytes(),
            bytes_after: after.size_bytes(),
        };
        tracing::info!(
            pages_released,
            bytes_before = report.bytes_before,
            bytes_after = report.bytes_after,
            "memory database compacted"
        );
        Ok(report)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::settings::{MemoryConfig, RetentionPolicy};
    use crate::services::memory::store::NewMemory;

    fn create_test_store(max_memories: usize, tool_use: RetentionPolicy) -> MemoryStore {
        let db = Database::new_in_memory().unwrap();
        let mut config = MemoryConfig {
            max_memories,
            ..MemoryConfig::default()
        };
        config.retention.tool_use = tool_use;
        MemoryStore::new(db, config)
    }

    fn store_tool(store: &MemoryStore, key: &str) -> String {
        store
            .store(NewMemory::new(MemoryType::ToolUse, format!("ran {}", key)).with_key(key))
            .unwrap()
            .id()
            .to_string()
    }

    fn store_pref(store: &MemoryStore, content: &str) -> String {
        store
            .store(NewMemory::new(MemoryType::Preference, content))
            .unwrap()
            .id()
            .to_string()
    }

    #[test]
    fn test_retention_keeps_most_recent() {
        let store = create_test_store(1_000, RetentionPolicy::bounded(3, 1));
        for i in 0..5 {
            store_tool(&store, &format!("t{}", i));
        }

        let report = store.prune(&PruneCriteria::default()).unwrap();
        assert_eq!(report.retention_deleted, 2);
        assert_eq!(report.by_type.get("tool-use"), Some(&2));
        assert!(store.get("t0").unwrap().is_none());
        assert!(store.get("t1").unwrap().is_none());
        assert!(store.get("t4").unwrap().is_some());
        assert_eq!(store.count().unwrap(), 3);
    }

    #[test]
    fn test_unbounded_types_never_count_pruned() {
        let store = create_test_store(2, RetentionPolicy::bounded(100, 0));
        for i in 0..5 {
            store_pref(&store, &format!("preference {}", i));
        }

        let report = store.prune(&PruneCriteria::default()).unwrap();
        assert_eq!(report.deleted, 0);
        assert!(report.still_over_ceiling);
        assert_eq!(store.count().unwrap(), 5);
    }

    #[test]
    fn test_ceiling_prunes_oldest_bounded_first() {
        let store = create_test_store(4, RetentionPolicy::bounded(100, 1));
        for i in 0..3 {
            store_pref(&store, &format!("preference {}", i));
        }
        for i in 0..3 {
            store_tool(&store, &format!("t{}", i));
        }

        let report = store.prune(&PruneCriteria::default()).unwrap();
        assert_eq!(report.active_deleted, 2);
        assert!(!report.still_over_ceiling);
        assert!(store.get("t0").unwrap().is_none());
        assert!(store.get("t1").unwrap().is_none());
        assert!(store.get("t2").unwrap().is_some());
        assert_eq!(store.count().unwrap(), 4);
    }

    #[test]
    fn test_ceiling_respects_floor() {
        let store = create_test_store(2, RetentionPolicy::bounded(100, 1));
        for i in 0..3 {
            store_pref(&store, &format!("preference {}", i));
        }
        store_tool(&store, "t0");
        store_tool(&store, "t1");

        let report = store.prune(&PruneCriteria::default()).unwrap();
        assert_eq!(report.deleted, 1);
        assert!(report.still_over_ceiling);
        assert_eq!(report.remaining, 4);
        assert!(store.get("t1").unwrap().is_some());
    }

    #[test]
    fn test_superseded_bounded_records_go_first() {
        let store = create_test_store(3, RetentionPolicy::bounded(100, 0));
        let c1 = store
            .store(NewMemory::new(MemoryType::Correction, "use v1 api").overriding("api"))
            .unwrap();
        store
            .store(NewMemory::new(MemoryType::Correction, "use v2 api").overriding("api"))
            .unwrap();
        store_tool(&store, "t0");
        store_tool(&store, "t1");

        let report = store.prune(&PruneCriteria::default()).unwrap();
        assert_eq!(report.superseded_deleted, 1);
        assert_eq!(report.active_deleted, 0);
        assert!(store.get(c1.id()).unwrap().is_none());
        assert!(store.get("t0").unwrap().is_some());
    }

    #[test]
    fn test_dry_run_deletes_nothing() {
        let store = create_test_store(1_000, RetentionPolicy::bounded(1, 0));
        store_tool(&store, "t0");
        store_tool(&store, "t1");

        let report = store
            .prune(&PruneCriteria {
                dry_run: true,
                ..PruneCriteria::default()
            })
            .unwrap();
        assert_eq!(report.deleted, 1);
        assert!(report.dry_run);
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_ceiling_override() {
        let store = create_test_store(1_000, RetentionPolicy::bounded(100, 0));
        for i in 0..4 {
            store_tool(&store, &format!("t{}", i));
        }
        let report = store
            .prune(&PruneCriteria {
                ceiling: Some(2),
                ..PruneCriteria::default()
            })
            .unwrap();
        assert_eq!(report.deleted, 2);
        assert_eq!(report.ceiling, 2);
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_prune_empty_store() {
        let store = create_test_store(10, RetentionPolicy::bounded(5, 1));
        let report = store.prune(&PruneCriteria::default()).unwrap();
        assert_eq!(report.deleted, 0);
        assert!(!report.still_over_ceiling);
    }

    #[test]
    fn test_compact_after_prune_releases_pages() {
        let store = create_test_store(1_000, RetentionPolicy::bounded(1, 0));
        let padding = "x".repeat(2_000);
        for i in 0..50 {
            store
                .store(
                    NewMemory::new(MemoryType::ToolUse, format!("{} {}", i, padding))
                        .with_key(format!("t{}", i)),
                )
                .unwrap();
        }
        store.prune(&PruneCriteria::default()).unwrap();

        let report = MemoryMaintenance::compact_with(store.database(), 8, 1_000).unwrap();
        assert!(report.pages_released > 0);
        assert!(report.bytes_after < report.bytes_before);
    }
}
