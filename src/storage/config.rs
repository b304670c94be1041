//! JSON Configuration Management
//!
//! Handles reading and writing the Claude Recall configuration file.

use std::fs;
use std::path::{Path, PathBuf};

use crate::models::settings::RecallConfig;
use crate::utils::error::{AppError, AppResult};
use crate::utils::paths::{config_path, ensure_dir};

/// Configuration service for managing runtime settings
#[derive(Debug)]
pub struct ConfigService {
    config_path: PathBuf,
    config: RecallConfig,
}

impl ConfigService {
    /// Create a new config service at the default location, loading existing
    /// config or writing defaults
    pub fn new() -> AppResult<Self> {
        let path = config_path()?;
        Self::open(path)
    }

    /// Load the config at `path`, creating it with defaults when missing
    pub fn open(path: impl Into<PathBuf>) -> AppResult<Self> {
        let config_path = path.into();
        if let Some(parent) = config_path.parent() {
            if !parent.as_os_str().is_empty() {
                ensure_dir(&parent.to_path_buf())?;
            }
        }

        let config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            let default_config = RecallConfig::default();
            Self::save_to_file(&config_path, &default_config)?;
            tracing::info!(path = %config_path.display(), "wrote default configuration");
            default_config
        };

        Ok(Self {
            config_path,
            config,
        })
    }

    /// Load configuration from a file
    fn load_from_file(path: &Path) -> AppResult<RecallConfig> {
        let content = fs::read_to_string(path)?;
        let config: RecallConfig = serde_json::from_str(&content)?;
        config.validate().map_err(AppError::config)?;
        Ok(config)
    }

    /// Save configuration to a file with pretty formatting
    fn save_to_file(path: &Path, config: &RecallConfig) -> AppResult<()> {
        config.validate().map_err(AppError::config)?;
        let content = serde_json::to_string_pretty(config)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Get the current configuration
    pub fn get_config(&self) -> &RecallConfig {
        &self.config
    }

    /// Get a clone of the current configuration
    pub fn get_config_clone(&self) -> RecallConfig {
        self.config.clone()
    }

    /// Apply `update` to a copy of the configuration, validate, then persist.
    /// The in-memory config is left untouched when validation fails.
    pub fn update_config<F>(&mut self, update: F) -> AppResult<RecallConfig>
    where
        F: FnOnce(&mut RecallConfig),
    {
        let mut next = self.config.clone();
        update(&mut next);
        Self::save_to_file(&self.config_path, &next)?;
        self.config = next;
        Ok(self.config.clone())
    }

    /// Save the current configuration to disk
    pub fn save(&self) -> AppResult<()> {
        Self::save_to_file(&self.config_path, &self.config)
    }

    /// Reset configuration to defaults
    pub fn reset(&mut self) -> AppResult<()> {
        self.config = RecallConfig::default();
        self.save()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_config_file(content: &str) -> (NamedTempFile, PathBuf) {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        let path = file.path().to_path_buf();
        (file, path)
    }

    #[test]
    fn test_load_config_from_file() {
        let (_file, path) =
            create_test_config_file(r#"{"queue": {"default_max_retries": 5}}"#);
        let config = ConfigService::load_from_file(&path).unwrap();
        assert_eq!(config.queue.default_max_retries, 5);
        assert_eq!(config.memory.max_memories, 10_000);
    }

    #[test]
    fn test_load_rejects_invalid_config() {
        let (_file, path) = create_test_config_file(r#"{"memory": {"max_memories": 0}}"#);
        let result = ConfigService::load_from_file(&path);
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn test_open_creates_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("nested").join("config.json");

        let service = ConfigService::open(&path).unwrap();

        assert!(path.exists());
        assert_eq!(service.path(), path.as_path());
        let loaded = ConfigService::load_from_file(&path).unwrap();
        assert_eq!(loaded.consumer.queue_name, service.get_config().consumer.queue_name);
    }

    #[test]
    fn test_config_update() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.json");
        let mut service = ConfigService::open(&path).unwrap();

        let updated = service
            .update_config(|c| c.memory.max_memories = 250)
            .unwrap();
        assert_eq!(updated.memory.max_memories, 250);

        let reloaded = ConfigService::open(&path).unwrap();
        assert_eq!(reloaded.get_config().memory.max_memories, 250);
    }

    #[test]
    fn test_invalid_update_is_not_applied() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.json");
        let mut service = ConfigService::open(&path).unwrap();

        let result = service.update_config(|c| c.queue.default_max_retries = 0);
        assert!(result.is_err());
        assert_eq!(service.get_config().queue.default_max_retries, 3);
    }

    #[test]
    fn test_reset_restores_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.json");
        let mut service = ConfigService::open(&path).unwrap();
        service.update_config(|c| c.maintenance.interval_secs = 10).unwrap();

        service.reset().unwrap();
        assert_eq!(service.get_config().maintenance.interval_secs, 300);
    }
}
