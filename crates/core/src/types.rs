//! Memory Vocabulary
//!
//! The closed sets of memory types and visibility scopes. Both are stored as
//! strings in SQLite and travel inside queue payloads, so each has a stable
//! string form.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Kind of knowledge a memory record carries.
///
/// Declaration order follows ranking priority: corrections outrank devops
/// rules, which outrank preferences, and so on down to tool-use traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MemoryType {
    Correction,
    Devops,
    Preference,
    Failure,
    ProjectKnowledge,
    ToolUse,
}

impl MemoryType {
    /// All memory types, highest ranking first
    pub const ALL: [MemoryType; 6] = [
        MemoryType::Correction,
        MemoryType::Devops,
        MemoryType::Preference,
        MemoryType::Failure,
        MemoryType::ProjectKnowledge,
        MemoryType::ToolUse,
    ];

    /// Convert to database string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Correction => "correction",
            MemoryType::Devops => "devops",
            MemoryType::Preference => "preference",
            MemoryType::Failure => "failure",
            MemoryType::ProjectKnowledge => "project-knowledge",
            MemoryType::ToolUse => "tool-use",
        }
    }

    /// Parse from database string representation.
    ///
    /// Underscore spellings (`project_knowledge`, `tool_use`) are accepted
    /// because older producers emit them.
    pub fn from_str(s: &str) -> CoreResult<Self> {
        match s {
            "correction" => Ok(MemoryType::Correction),
            "devops" => Ok(MemoryType::Devops),
            "preference" => Ok(MemoryType::Preference),
            "failure" => Ok(MemoryType::Failure),
            "project-knowledge" | "project_knowledge" => Ok(MemoryType::ProjectKnowledge),
            "tool-use" | "tool_use" => Ok(MemoryType::ToolUse),
            _ => Err(CoreError::parse(format!("Invalid memory type: {}", s))),
        }
    }

    /// Ranking priority, 6 for corrections down to 1 for tool-use
    pub fn priority(&self) -> u8 {
        match self {
            MemoryType::Correction => 6,
            MemoryType::Devops => 5,
            MemoryType::Preference => 4,
            MemoryType::Failure => 3,
            MemoryType::ProjectKnowledge => 2,
            MemoryType::ToolUse => 1,
        }
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Visibility domain of a memory record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Visible from every project
    Universal,
    /// Visible only inside the project it was recorded for
    Project,
    /// Legacy records written before scoping existed; visible everywhere
    Unscoped,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Universal => "universal",
            Scope::Project => "project",
            Scope::Unscoped => "unscoped",
        }
    }

    pub fn from_str(s: &str) -> CoreResult<Self> {
        match s {
            "universal" => Ok(Scope::Universal),
            "project" => Ok(Scope::Project),
            "unscoped" => Ok(Scope::Unscoped),
            _ => Err(CoreError::parse(format!("Invalid scope: {}", s))),
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
