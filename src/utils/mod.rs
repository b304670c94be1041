//! Utilities
//!
//! Error types, path resolution, clock helpers, and blocking-task bridging
//! shared by every service.

pub mod error;
pub mod paths;
pub mod task;
pub mod time;

pub use error::*;
pub use paths::*;
pub use task::*;
pub use time::*;
