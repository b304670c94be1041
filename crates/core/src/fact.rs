//! Classified Facts
//!
//! A `Fact` is one unit of knowledge pulled out of free text. Facts are
//! produced by a `Classifier`, an external and swappable collaborator: a
//! regex heuristic, a statistical model, or an LLM call all satisfy the same
//! trait without the store or queue knowing which one is in use.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::types::MemoryType;

/// A classified unit of knowledge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fact {
    #[serde(rename = "type")]
    pub fact_type: MemoryType,
    pub content: String,
    pub confidence: f32,
    #[serde(default)]
    pub is_override: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preference_key: Option<String>,
}

impl Fact {
    pub fn new(fact_type: MemoryType, content: impl Into<String>, confidence: f32) -> Self {
        Self {
            fact_type,
            content: content.into(),
            confidence,
            is_override: false,
            preference_key: None,
        }
    }

    /// Mark this fact as overriding whatever is recorded under `key`
    pub fn overriding(mut self, key: impl Into<String>) -> Self {
        self.is_override = true;
        self.preference_key = Some(key.into());
        self
    }

    /// Attach a preference key without forcing an override
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.preference_key = Some(key.into());
        self
    }

    /// Check the fact is storable: non-empty content, finite confidence in [0, 1]
    pub fn validate(&self) -> CoreResult<()> {
        if self.content.trim().is_empty() {
            return Err(CoreError::validation("fact content is empty"));
        }
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(CoreError::validation(format!(
                "fact confidence must be within [0, 1], got {}",
                self.confidence
            )));
        }
        if let Some(ref key) = self.preference_key {
            if key.trim().is_empty() {
                return Err(CoreError::validation("preference key is empty"));
            }
        }
        Ok(())
    }
}

/// Turns raw utterances into typed facts.
pub trait Classifier: Send + Sync {
    fn classify(&self, text: &str) -> Vec<Fact>;
}
