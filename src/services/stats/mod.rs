//! Stats & Compaction
//!
//! Usage reporting and the periodic maintenance task.

pub mod manager;

pub use manager::{MaintenanceReport, StatsManager, StatsReport, UsageLevel};
