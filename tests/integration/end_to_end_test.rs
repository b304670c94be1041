//! End-to-End Tests
//!
//! Prompt hook → classifier → queue → consumer → store → search, through
//! `AppState` on a database file.

use std::time::Duration;

use claude_recall::services::bridge::HookEvent;
use claude_recall::services::memory::SearchFilters;
use claude_recall::{AppState, MemoryType, RecallConfig, Scope};
use serde_json::json;
use tempfile::TempDir;

fn open_state(dir: &TempDir) -> AppState {
    let mut config = RecallConfig::default();
    config.consumer.idle_backoff_min_ms = 5;
    config.consumer.idle_backoff_max_ms = 25;
    AppState::open(config, &dir.path().join("recall.db")).unwrap()
}

async fn drain(state: &AppState) {
    let consumer = state.consumer();
    while consumer.run_once().await.unwrap().is_some() {}
}

#[tokio::test]
async fn test_jwt_then_sessions_scenario() {
    let dir = TempDir::new().unwrap();
    let state = open_state(&dir);

    state
        .bridge()
        .capture_prompt(&HookEvent::from_prompt("Use JWT for auth"))
        .unwrap();
    drain(&state).await;

    let hits = state.bridge().search_now("auth", &SearchFilters::default()).unwrap();
    assert_eq!(hits.len(), 1);
    assert!(hits[0].record.content.contains("JWT"));

    state
        .bridge()
        .capture_prompt(&HookEvent::from_prompt("Actually, use sessions for auth."))
        .unwrap();
    drain(&state).await;

    let hits = state.bridge().search_now("auth", &SearchFilters::default()).unwrap();
    assert_eq!(hits.len(), 1);
    assert!(hits[0].record.content.contains("sessions"));
    assert_eq!(hits[0].record.memory_type, MemoryType::Preference);

    let history = state.store().history(&hits[0].record.id).unwrap();
    assert_eq!(history.len(), 2);
    assert!(history[1].content.contains("JWT"));
    assert_eq!(history[1].superseded_by.as_deref(), Some(history[0].id.as_str()));

    let rules = state.store().load_rules(None).unwrap();
    assert_eq!(rules.preferences.len(), 1);
    assert!(rules.preferences[0].content.contains("sessions"));
}

#[tokio::test]
async fn test_project_bound_capture_is_scoped() {
    let dir = TempDir::new().unwrap();
    let state = open_state(&dir);

    let event: HookEvent = serde_json::from_value(json!({
        "message": "Remember that migrations live in db/migrate",
        "sessionId": "sess-1",
        "projectId": "rails-app"
    }))
    .unwrap();
    state.bridge().capture_prompt(&event).unwrap();
    drain(&state).await;

    let in_project = state
        .bridge()
        .search_now("migrations", &SearchFilters::for_project("rails-app"))
        .unwrap();
    assert_eq!(in_project.len(), 1);
    let record = &in_project[0].record;
    assert_eq!(record.scope, Scope::Project);
    assert_eq!(record.memory_type, MemoryType::ProjectKnowledge);
    assert_eq!(record.content, "migrations live in db/migrate");
    assert_eq!(record.metadata.get("sessionId"), Some(&json!("sess-1")));

    let elsewhere = state
        .bridge()
        .search_now("migrations", &SearchFilters::for_project("other"))
        .unwrap();
    assert!(elsewhere.is_empty());
}

#[tokio::test]
async fn test_background_tasks_process_and_shut_down_cleanly() {
    let dir = TempDir::new().unwrap();
    let state = open_state(&dir);
    state.start().await.unwrap();

    for prompt in [
        "Always run cargo fmt before committing",
        "We deploy with GitHub Actions",
        "The release failed because the tag already existed",
    ] {
        state
            .bridge()
            .capture_prompt(&HookEvent::from_prompt(prompt))
            .unwrap();
    }

    for _ in 0..500 {
        if state.queue().stats(None).unwrap().completed == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let report = state.shutdown().await.unwrap().unwrap();
    assert_eq!(report.acked, 3);

    let queue_stats = state.queue().stats(None).unwrap();
    assert_eq!(queue_stats.processing, 0);
    assert_eq!(queue_stats.completed, 3);

    let stats = state.store().stats().unwrap();
    assert_eq!(stats.active, 3);
    assert_eq!(stats.by_type.get("devops"), Some(&1));
    assert_eq!(stats.by_type.get("failure"), Some(&1));
}

#[tokio::test]
async fn test_state_survives_restart() {
    let dir = TempDir::new().unwrap();
    {
        let state = open_state(&dir);
        state
            .bridge()
            .capture_prompt(&HookEvent::from_prompt("Never commit secrets"))
            .unwrap();
        // not consumed before the "process" exits
    }

    let state = open_state(&dir);
    drain(&state).await;
    let hits = state
        .bridge()
        .search_now("secrets", &SearchFilters::default())
        .unwrap();
    assert_eq!(hits.len(), 1);
}
