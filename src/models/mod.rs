//! Data Models
//!
//! Configuration structures shared across services.

pub mod settings;

pub use settings::*;
