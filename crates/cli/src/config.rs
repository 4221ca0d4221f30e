//! Application configuration
//!
//! Loaded from `--config <file>` or `$CONFIG_DIR/settle/config.toml`.
//! A missing file means defaults; every field has a serde default.

use anyhow::{Context, Result};
use pipeline::SchedulerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use watcher::IgnoreConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scheduler: SchedulerConfig,
    pub ignore: IgnoreConfig,
    pub watch: WatchConfig,
}

/// Settings for `settle watch`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Seconds between reconciliation scans (0 disables)
    pub reconcile_interval_secs: u64,

    /// Seconds between status log lines (0 disables)
    pub status_interval_secs: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_secs: 300,
            status_interval_secs: 30,
        }
    }
}

/// Default location of the config file
pub fn config_file_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("settle").join("config.toml"))
}

/// Load configuration from `explicit`, or the default location
///
/// An explicit path must exist; the default location may be absent.
pub fn load(explicit: Option<&Path>) -> Result<AppConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match config_file_path() {
            Some(path) if path.exists() => path,
            _ => return Ok(AppConfig::default()),
        },
    };

    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    parse(&contents).with_context(|| format!("Invalid config file {}", path.display()))
}

pub fn parse(contents: &str) -> Result<AppConfig> {
    let config: AppConfig = toml::from_str(contents)?;
    config.scheduler.validate()?;
    Ok(config)
}

/// Example configuration with every key and its default
pub fn example_config() -> &'static str {
    r#"# settle configuration

[scheduler]
# Quiet period after the last event before a path is processed
delay_seconds = 2.0
# Upper bound from first event to processing, even under constant churn
max_delay_seconds = 30.0
# Worker threads (1-64)
worker_threads = 4
# Ready queue capacity; a full queue holds changes back instead of dropping them
max_queue_size = 1000
# Changes dequeued per worker wakeup
batch_size = 8
sweep_interval_ms = 250
dequeue_timeout_ms = 200
# How long stop waits for in-flight work
stop_timeout_ms = 5000
# Recent successes/failures kept for status
history_size = 50

[ignore]
use_gitignore = true
patterns = ["*.log", "target/"]

[watch]
# 0 disables the periodic rescan
reconcile_interval_secs = 300
status_interval_secs = 30
"#
}
