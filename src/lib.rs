//! Claude Recall - Persistent Memory for AI Coding Assistants
//!
//! This library provides the backend for Claude Recall.
//! It includes:
//! - Memory store with deduplication, supersession, ranking and retention
//! - Durable SQLite queue shared across processes
//! - Integration bridge from assistant hooks to the store
//! - Stats & compaction manager
//! - Storage layer (SQLite, Config), data models and utilities

pub mod models;
pub mod services;
pub mod state;
pub mod storage;
pub mod utils;

pub use claude_recall_core::{Classifier, Fact, MemoryType, Scope};
pub use models::settings::RecallConfig;
pub use state::AppState;
pub use utils::error::{AppError, AppResult};
