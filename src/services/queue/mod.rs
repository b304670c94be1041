//! Durable Queue
//!
//! Persistent message queue with priority ordering, retry with backoff,
//! dead-lettering, and orphan recovery.
//!
//! ## Module Structure
//!
//! - `types` - Messages, dead letters, and operation results
//! - `store` - `DurableQueue` state transitions over SQLite

pub mod store;
pub mod types;

pub use store::{backoff_delay_ms, DurableQueue, LOST_MESSAGE_ERROR};
pub use types::{
    DeadLetterEntry, EnqueueRequest, MessageStatus, NackOutcome, QueueMessage, QueueStats,
    SweepReport,
};
