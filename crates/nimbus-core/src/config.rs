//! Nimbus configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{NimbusError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NimbusConfig {
    /// Log filter string, `tracing_subscriber::EnvFilter` syntax.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// How many async worker loops pull from the work queue.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Timer tick interval in seconds — how often due schedules are checked.
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// Path of the SQLite schedule store.
    #[serde(default = "default_schedule_db_path")]
    pub schedule_db_path: PathBuf,
    /// Soft time limit for batch action/script runs, in seconds.
    #[serde(default = "default_action_soft_limit_secs")]
    pub action_soft_limit_secs: u64,
}

fn default_log_filter() -> String {
    "info".into()
}
fn default_worker_count() -> usize {
    4
}
fn default_tick_interval_secs() -> u64 {
    10
}
fn default_schedule_db_path() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.join(".nimbus").join("schedules.db")
}
fn default_action_soft_limit_secs() -> u64 {
    3600
}

impl Default for NimbusConfig {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
            worker_count: default_worker_count(),
            tick_interval_secs: default_tick_interval_secs(),
            schedule_db_path: default_schedule_db_path(),
            action_soft_limit_secs: default_action_soft_limit_secs(),
        }
    }
}

impl NimbusConfig {
    /// Load config from a TOML file. Missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| NimbusError::Config(format!("read {}: {e}", path.display())))?;
        toml::from_str(&raw).map_err(|e| NimbusError::Config(format!("parse {}: {e}", path.display())))
    }

    /// Save config to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| NimbusError::Config(format!("mkdir {}: {e}", parent.display())))?;
        }
        let raw = toml::to_string_pretty(self)
            .map_err(|e| NimbusError::Config(format!("serialize: {e}")))?;
        std::fs::write(path, raw)
            .map_err(|e| NimbusError::Config(format!("write {}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = NimbusConfig::default();
        assert_eq!(cfg.worker_count, 4);
        assert_eq!(cfg.tick_interval_secs, 10);
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let path = std::env::temp_dir().join("nimbus-no-such-config.toml");
        let cfg = NimbusConfig::load(&path).unwrap();
        assert_eq!(cfg.log_filter, "info");
    }

    #[test]
    fn test_roundtrip() {
        let dir = std::env::temp_dir().join("nimbus-config-test");
        std::fs::create_dir_all(&dir).ok();
        let path = dir.join("config.toml");
        let mut cfg = NimbusConfig::default();
        cfg.worker_count = 8;
        cfg.save(&path).unwrap();
        let loaded = NimbusConfig::load(&path).unwrap();
        assert_eq!(loaded.worker_count, 8);
        std::fs::remove_dir_all(&dir).ok();
    }
}
