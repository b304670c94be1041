//! Memory Store Integration Tests
//!
//! Store behavior against on-disk databases, including several pools
//! writing to the same file.

use std::sync::{Arc, Barrier};
use std::thread;

use claude_recall::models::settings::{MemoryConfig, RetentionPolicy};
use claude_recall::services::memory::{
    MemoryStore, NewMemory, PruneCriteria, SearchFilters, StoreOutcome,
};
use claude_recall::storage::Database;
use claude_recall::{AppError, MemoryType, Scope};
use tempfile::TempDir;

fn open_store(dir: &TempDir, config: MemoryConfig) -> MemoryStore {
    let db = Database::open(&dir.path().join("recall.db")).unwrap();
    MemoryStore::new(db, config)
}

// ============================================================================
// Idempotence
// ============================================================================

#[test]
fn test_store_is_idempotent_modulo_whitespace_and_case() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, MemoryConfig::default());

    let first = store
        .store(NewMemory::new(MemoryType::Preference, "Use pnpm for installs"))
        .unwrap();
    let second = store
        .store(NewMemory::new(MemoryType::Preference, "  use   PNPM for installs "))
        .unwrap();

    assert!(matches!(first, StoreOutcome::Inserted { .. }));
    assert!(second.is_duplicate());
    assert_eq!(first.id(), second.id());
    assert_eq!(store.count().unwrap(), 1);

    let record = store.get(first.id()).unwrap().unwrap();
    assert_eq!(record.access_count, 1);
}

#[test]
fn test_same_content_different_scope_is_distinct() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, MemoryConfig::default());

    store
        .store(NewMemory::new(MemoryType::Devops, "deploy with fly"))
        .unwrap();
    store
        .store(NewMemory::new(MemoryType::Devops, "deploy with fly").in_project("api"))
        .unwrap();
    assert_eq!(store.count().unwrap(), 2);
}

#[test]
fn test_records_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let id = {
        let store = open_store(&dir, MemoryConfig::default());
        store
            .store(NewMemory::new(MemoryType::ProjectKnowledge, "API lives under /v2").with_key("api_root"))
            .unwrap()
            .id()
            .to_string()
    };

    let reopened = open_store(&dir, MemoryConfig::default());
    let record = reopened.get("api_root").unwrap().unwrap();
    assert_eq!(record.id, id);
    assert_eq!(record.scope, Scope::Universal);
}

// ============================================================================
// Supersession
// ============================================================================

#[test]
fn test_override_supersedes_and_keeps_history() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, MemoryConfig::default());

    let old = store
        .store(NewMemory::new(MemoryType::Preference, "Use JWT for auth").overriding("auth"))
        .unwrap();
    let new = store
        .store(NewMemory::new(MemoryType::Preference, "Use sessions for auth").overriding("auth"))
        .unwrap();

    match &new {
        StoreOutcome::Superseded { replaced, .. } => assert_eq!(replaced, old.id()),
        other => panic!("expected supersession, got {:?}", other),
    }

    let old_record = store.get(old.id()).unwrap().unwrap();
    assert_eq!(old_record.superseded_by.as_deref(), Some(new.id()));

    let history = store.history(new.id()).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, new.id());
    assert_eq!(history[1].id, old.id());

    let active = store
        .active_for_key(MemoryType::Preference, Scope::Universal, None, "auth")
        .unwrap()
        .unwrap();
    assert_eq!(active.id, new.id());

    let hits = store.search("auth", &SearchFilters::default()).unwrap();
    assert_eq!(hits.len(), 1);
    assert!(hits[0].record.content.contains("sessions"));
}

#[test]
fn test_concurrent_overrides_leave_one_active() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("recall.db");
    // create the schema before the writers race
    Database::open(&path).unwrap();

    let writers = 4;
    let barrier = Arc::new(Barrier::new(writers));
    let handles: Vec<_> = (0..writers)
        .map(|i| {
            let path = path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let store = MemoryStore::new(Database::open(&path).unwrap(), MemoryConfig::default());
                barrier.wait();
                for round in 0..5 {
                    store
                        .store(
                            NewMemory::new(
                                MemoryType::Preference,
                                format!("writer {} round {} picks a formatter", i, round),
                            )
                            .overriding("formatter"),
                        )
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let store = open_store(&dir, MemoryConfig::default());
    let stats = store.stats().unwrap();
    assert_eq!(stats.total, 20);
    assert_eq!(stats.active, 1);
    assert_eq!(stats.superseded, 19);
}

// ============================================================================
// Ranking & scope
// ============================================================================

#[test]
fn test_type_ranking_correction_before_tool_use() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, MemoryConfig::default());

    store
        .store(NewMemory::new(MemoryType::ToolUse, "ran cargo test in workspace"))
        .unwrap();
    store
        .store(NewMemory::new(MemoryType::Correction, "cargo test needs --workspace"))
        .unwrap();

    let hits = store.search("cargo test", &SearchFilters::default()).unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].record.memory_type, MemoryType::Correction);
    assert!(hits[0].score > hits[1].score);
}

#[test]
fn test_scope_filtering_between_projects() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, MemoryConfig::default());

    store
        .store(NewMemory::new(MemoryType::Devops, "lint with clippy"))
        .unwrap();
    store
        .store(NewMemory::new(MemoryType::Devops, "lint with eslint").in_project("web"))
        .unwrap();
    store
        .store(NewMemory::new(MemoryType::Devops, "lint with ruff").in_project("ml"))
        .unwrap();
    store
        .store(NewMemory::new(MemoryType::Devops, "lint before commit").with_scope(Scope::Unscoped))
        .unwrap();

    let web = store.search("lint", &SearchFilters::for_project("web")).unwrap();
    let contents: Vec<&str> = web.iter().map(|h| h.record.content.as_str()).collect();
    assert_eq!(web.len(), 3);
    assert!(contents.contains(&"lint with eslint"));
    assert!(!contents.contains(&"lint with ruff"));

    let unbound = store.search("lint", &SearchFilters::default()).unwrap();
    assert_eq!(unbound.len(), 2);

    let global = store.search("lint", &SearchFilters::global()).unwrap();
    assert_eq!(global.len(), 4);
}

// ============================================================================
// Retention & capacity
// ============================================================================

#[test]
fn test_prune_respects_floor_and_unbounded_types() {
    let dir = TempDir::new().unwrap();
    let mut config = MemoryConfig {
        max_memories: 5,
        ..MemoryConfig::default()
    };
    config.retention.tool_use = RetentionPolicy::bounded(100, 3);
    let store = open_store(&dir, config);

    for i in 0..6 {
        store
            .store(NewMemory::new(MemoryType::ToolUse, format!("ran tool {}", i)))
            .unwrap();
    }
    for i in 0..4 {
        store
            .store(NewMemory::new(MemoryType::Preference, format!("preference {}", i)))
            .unwrap();
    }

    let report = store.prune(&PruneCriteria::default()).unwrap();
    assert_eq!(report.deleted, 3);
    assert!(report.still_over_ceiling);

    let stats = store.stats().unwrap();
    assert_eq!(stats.by_type.get("tool-use"), Some(&3));
    assert_eq!(stats.by_type.get("preference"), Some(&4));
}

#[test]
fn test_hard_ceiling_rejects_new_records_but_not_duplicates() {
    let dir = TempDir::new().unwrap();
    let store = open_store(
        &dir,
        MemoryConfig {
            max_memories: 2,
            hard_ceiling: Some(2),
            ..MemoryConfig::default()
        },
    );

    store.store(NewMemory::new(MemoryType::Failure, "build one broke")).unwrap();
    store.store(NewMemory::new(MemoryType::Failure, "build two broke")).unwrap();

    let third = store.store(NewMemory::new(MemoryType::Failure, "build three broke"));
    assert!(matches!(third, Err(AppError::Capacity(_))));

    let dup = store
        .store(NewMemory::new(MemoryType::Failure, "build one broke"))
        .unwrap();
    assert!(dup.is_duplicate());
}

#[test]
fn test_validation_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, MemoryConfig::default());

    let result = store.store(NewMemory::new(MemoryType::Preference, "   "));
    assert!(matches!(result, Err(AppError::Validation(_))));
    let result = store.store(NewMemory::new(MemoryType::Preference, "x").with_confidence(1.5));
    assert!(matches!(result, Err(AppError::Validation(_))));
    assert_eq!(store.count().unwrap(), 0);
}
