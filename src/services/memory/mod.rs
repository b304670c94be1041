//! Memory Store
//!
//! Persistent, deduplicated, typed facts with supersession chains and
//! read-time relevance ranking.
//!
//! ## Module Structure
//!
//! - `store` - `MemoryStore` with store/get/history/rules operations
//! - `retrieval` - Search filters and the relevance formula
//! - `maintenance` - Retention pruning and storage compaction
//! - `extraction` - `PatternClassifier`, the default heuristic `Classifier`

pub mod extraction;
pub mod maintenance;
pub mod retrieval;
pub mod store;

pub use extraction::PatternClassifier;
pub use maintenance::{CompactionReport, MemoryMaintenance, PruneCriteria, PruneReport};
pub use retrieval::{compute_relevance_score, RankedMemory, SearchFilters};
pub use store::{
    MemoryRecord, MemoryStats, MemoryStore, NewMemory, RuleSet, StoreOutcome,
    LAST_QUEUE_MESSAGE_ID_KEY, QUEUE_MESSAGE_ID_KEY,
};
