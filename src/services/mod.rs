//! Services
//!
//! Business logic for memory, queueing, hook integration and maintenance.

pub mod bridge;
pub mod memory;
pub mod queue;
pub mod stats;

pub use bridge::{IntegrationBridge, QueueConsumer};
pub use memory::{MemoryStore, PatternClassifier};
pub use queue::DurableQueue;
pub use stats::StatsManager;
