//! Claude Recall Core
//!
//! Shared vocabulary for the Claude Recall workspace: memory types and scopes,
//! the `Fact` unit produced by classifiers, and the `Classifier` trait itself.
//! This crate has no dependency on storage, async runtimes, or the queue.
//!
//! ## Module Organization
//!
//! - `error` - Core error types (`CoreError`, `CoreResult`)
//! - `types` - Memory type and scope enums shared by store and queue payloads
//! - `fact` - Classified facts and the swappable `Classifier` trait

pub mod error;
pub mod fact;
pub mod types;

// ── Error Types ────────────────────────────────────────────────────────
pub use error::{CoreError, CoreResult};

// ── Vocabulary ─────────────────────────────────────────────────────────
pub use types::{MemoryType, Scope};

// ── Classification ─────────────────────────────────────────────────────
pub use fact::{Classifier, Fact};
