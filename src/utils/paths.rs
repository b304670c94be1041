//! Cross-Platform Path Utilities
//!
//! Functions for resolving the Claude Recall data directory (~/.claude-recall/)
//! and the files inside it. `RECALL_DB_PATH` and `RECALL_CONFIG` override the
//! defaults so several processes can be pointed at the same database.

use std::path::PathBuf;

use crate::utils::error::{AppError, AppResult};

/// Environment variable overriding the database location
pub const DB_PATH_ENV: &str = "RECALL_DB_PATH";

/// Environment variable overriding the config file location
pub const CONFIG_PATH_ENV: &str = "RECALL_CONFIG";

/// Get the user's home directory
pub fn home_dir() -> AppResult<PathBuf> {
    dirs::home_dir().ok_or_else(|| AppError::config("Could not determine home directory"))
}

/// Get the Claude Recall directory (~/.claude-recall/)
pub fn recall_dir() -> AppResult<PathBuf> {
    Ok(home_dir()?.join(".claude-recall"))
}

/// Get the config file path (~/.claude-recall/config.json)
pub fn config_path() -> AppResult<PathBuf> {
    match std::env::var_os(CONFIG_PATH_ENV) {
        Some(path) if !path.is_empty() => Ok(PathBuf::from(path)),
        _ => Ok(recall_dir()?.join("config.json")),
    }
}

/// Get the database file path (~/.claude-recall/claude-recall.db)
pub fn database_path() -> AppResult<PathBuf> {
    match std::env::var_os(DB_PATH_ENV) {
        Some(path) if !path.is_empty() => Ok(PathBuf::from(path)),
        _ => Ok(recall_dir()?.join("claude-recall.db")),
    }
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(path: &PathBuf) -> AppResult<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}
