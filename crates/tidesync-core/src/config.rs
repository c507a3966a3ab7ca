//! Configuration for the TideSync client
//!
//! Typed structs mapping to the YAML configuration file, with loading,
//! defaults, and a platform-appropriate default location.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub store: StoreConfig,
    pub api: ApiConfig,
    pub watcher: WatcherConfig,
    pub logging: LoggingConfig,
}

/// Synchronization settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Root directory mirrored against the cloud
    pub root: PathBuf,
    /// Seconds between remote metadata pulls
    pub poll_interval: u64,
}

/// State database settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path of the SQLite database file
    pub db_path: PathBuf,
}

/// Remote service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the sync service
    pub base_url: String,
    /// User identity sent as `username` on every call
    pub user_email: String,
}

/// Filesystem watcher debounce settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Milliseconds between mtime re-checks while a file is changing
    pub poll_interval_ms: u64,
    /// Milliseconds a file's mtime must stay stable before an event fires
    pub settle_ms: u64,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`
    pub level: String,
}

impl Config {
    /// Load configuration from a YAML file at `path`
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file
    ///
    /// Typically `$XDG_CONFIG_HOME/tidesync/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("tidesync")
            .join("config.yaml")
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            root: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("~"))
                .join("TideSync"),
            poll_interval: 30,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("tidesync")
                .join("state.db"),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            user_email: String::new(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            settle_ms: 2000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sensible() {
        let config = Config::default();
        assert_eq!(config.sync.poll_interval, 30);
        assert_eq!(config.watcher.poll_interval_ms, 100);
        assert_eq!(config.watcher.settle_ms, 2000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_yaml_fills_in_defaults() {
        let yaml = "sync:\n  root: /data/sync\napi:\n  base_url: https://sync.example.com\n  user_email: me@example.com\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.sync.root, PathBuf::from("/data/sync"));
        assert_eq!(config.api.base_url, "https://sync.example.com");
        // Untouched sections keep their defaults.
        assert_eq!(config.sync.poll_interval, 30);
        assert_eq!(config.watcher.settle_ms, 2000);
    }

    #[test]
    fn test_load_or_default_on_missing_file() {
        let config = Config::load_or_default(Path::new("/nonexistent/config.yaml"));
        assert_eq!(config.logging.level, "info");
    }
}
