//! Configuration module for STAGEHAND.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::{Result, StagehandError};

/// Runtime configuration: tick cadence and data locations.
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Directory scanned for .lua script sources.
    #[serde(default = "default_scripts_dir")]
    pub scripts_dir: String,
    /// Path to the persistent script data file.
    #[serde(default = "default_data_file")]
    pub data_file: String,
    /// Host tick interval in milliseconds.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
}

fn default_scripts_dir() -> String {
    "scripts".to_string()
}

fn default_data_file() -> String {
    "data/script_data.json".to_string()
}

fn default_tick_interval() -> u64 {
    50 // ~20 Hz
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            scripts_dir: default_scripts_dir(),
            data_file: default_data_file(),
            tick_interval_ms: default_tick_interval(),
        }
    }
}

/// Per-script resource and fault-containment limits.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Wall-clock budget for a single hook invocation, in milliseconds.
    #[serde(default = "default_hook_timeout")]
    pub hook_timeout_ms: u64,
    /// Memory growth budget for a single hook invocation, in megabytes.
    #[serde(default = "default_memory_budget")]
    pub memory_budget_mb: usize,
    /// Errors before a script is force-disabled.
    #[serde(default = "default_max_errors")]
    pub max_errors_per_script: u32,
    /// Cool-down window for duplicate error reports, in seconds.
    #[serde(default = "default_dedup_window")]
    pub dedup_window_secs: u64,
    /// Capacity of the recent-error ring buffer.
    #[serde(default = "default_ring_capacity")]
    pub error_ring_capacity: usize,
    /// Retention for recorded errors, in seconds.
    #[serde(default = "default_error_retention")]
    pub error_retention_secs: u64,
}

fn default_hook_timeout() -> u64 {
    100
}

fn default_memory_budget() -> usize {
    64
}

fn default_max_errors() -> u32 {
    10
}

fn default_dedup_window() -> u64 {
    30
}

fn default_ring_capacity() -> usize {
    100
}

fn default_error_retention() -> u64 {
    3600
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            hook_timeout_ms: default_hook_timeout(),
            memory_budget_mb: default_memory_budget(),
            max_errors_per_script: default_max_errors(),
            dedup_window_secs: default_dedup_window(),
            error_ring_capacity: default_ring_capacity(),
            error_retention_secs: default_error_retention(),
        }
    }
}

impl LimitsConfig {
    /// Hook timeout as a [`Duration`].
    pub fn hook_timeout(&self) -> Duration {
        Duration::from_millis(self.hook_timeout_ms)
    }

    /// Memory budget in bytes.
    pub fn memory_budget_bytes(&self) -> usize {
        self.memory_budget_mb * 1024 * 1024
    }

    /// Dedup window as a [`Duration`].
    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }

    /// Error retention as a [`Duration`].
    pub fn error_retention(&self) -> Duration {
        Duration::from_secs(self.error_retention_secs)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/stagehand.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Runtime configuration.
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// Per-script limits.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(StagehandError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| StagehandError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `STAGEHAND_SCRIPTS_DIR`: Override the scripts directory
    /// - `STAGEHAND_DATA_FILE`: Override the persistent data file path
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("STAGEHAND_SCRIPTS_DIR") {
            if !dir.is_empty() {
                self.runtime.scripts_dir = dir;
            }
        }
        if let Ok(file) = std::env::var("STAGEHAND_DATA_FILE") {
            if !file.is_empty() {
                self.runtime.data_file = file;
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.runtime.tick_interval_ms == 0 {
            return Err(StagehandError::Config(
                "tick_interval_ms must be positive".to_string(),
            ));
        }
        if self.limits.hook_timeout_ms == 0 {
            return Err(StagehandError::Config(
                "hook_timeout_ms must be positive".to_string(),
            ));
        }
        if self.limits.memory_budget_mb == 0 {
            return Err(StagehandError::Config(
                "memory_budget_mb must be positive".to_string(),
            ));
        }
        if self.limits.max_errors_per_script == 0 {
            return Err(StagehandError::Config(
                "max_errors_per_script must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
