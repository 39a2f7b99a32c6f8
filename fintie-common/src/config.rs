//! Configuration management for fintie.
//!
//! Configuration lives in a single JSON file at `<config dir>/fintie/config.json`
//! (`~/.config/fintie/config.json` on Linux).
//!
//! # Configuration Priority
//!
//! 1. Environment variables (FINTIE_* prefix)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//! - `FINTIE_DATA_PATH` → data_path
//! - `FINTIE_LOG_LEVEL` → observability.log_level
//! - `FINTIE_LOG_FORMAT` → observability.log_format

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from(".fintie"),
        |dirs| dirs.config_dir().join("fintie"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

fn default_data_path() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from("fintie-data"),
        |dirs| dirs.home_dir().join("fintie-data"),
    )
}

// ============================================================================
// HTTP Configuration
// ============================================================================

/// Settings for the shared HTTP session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// User-Agent sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Total per-request timeout (including body read) in seconds
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
        }
    }
}

impl HttpConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

// ============================================================================
// Fetch Configuration
// ============================================================================

/// Settings for fallback fetches and concurrent batches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Deadline for one whole fallback fetch across all sources, in seconds
    #[serde(default = "default_deadline")]
    pub deadline_secs: u64,

    /// Maximum in-flight requests within one batch
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,

    /// Page size for paginated list sources
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            deadline_secs: default_deadline(),
            batch_concurrency: default_batch_concurrency(),
            page_size: default_page_size(),
        }
    }
}

impl FetchConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }
}

// ============================================================================
// Observability Configuration
// ============================================================================

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,

    /// Additional module targets pinned to `warn`.
    #[serde(default)]
    pub excluded_targets: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            excluded_targets: Vec::new(),
        }
    }
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root directory for persisted artifacts
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub fetch: FetchConfig,

    /// Per-category source order overrides, e.g. `"stock_info": ["sina", "qq"]`
    #[serde(default)]
    pub sources: BTreeMap<String, Vec<String>>,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_path: default_data_path(),
            http: HttpConfig::default(),
            fetch: FetchConfig::default(),
            sources: BTreeMap::new(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::warn!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides applied.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("FINTIE_DATA_PATH") {
            if !path.is_empty() {
                self.data_path = PathBuf::from(path);
            }
        }

        if let Ok(level) = std::env::var("FINTIE_LOG_LEVEL") {
            self.observability.log_level = level;
        }

        if let Ok(format) = std::env::var("FINTIE_LOG_FORMAT") {
            self.observability.log_format = format;
        }
    }

    /// Return a copy with a partial JSON document deep-merged on top.
    pub fn with_overrides(&self, overrides: Value) -> Result<Self> {
        let mut base = serde_json::to_value(self).context("Failed to serialize config")?;
        merge_json(&mut base, overrides);
        serde_json::from_value(base).context("Failed to apply config overrides")
    }

    /// Configured source order for a category, if overridden.
    pub fn source_order(&self, category: &str) -> Option<&[String]> {
        self.sources.get(category).map(Vec::as_slice)
    }

    /// Check value ranges.
    pub fn validate(&self) -> crate::Result<()> {
        if self.http.connect_timeout_secs == 0 || self.http.read_timeout_secs == 0 {
            return Err(crate::Error::Config("http timeouts must be greater than zero".into()));
        }
        if self.fetch.batch_concurrency == 0 {
            return Err(crate::Error::Config("fetch.batch_concurrency must be at least 1".into()));
        }
        if self.fetch.page_size == 0 {
            return Err(crate::Error::Config("fetch.page_size must be at least 1".into()));
        }
        Ok(())
    }

    /// Save configuration to the default path.
    pub fn save(&self) -> Result<()> {
        self.save_to(&config_path())
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }
}

/// Deep merge two JSON values.
/// Source values override target values, with object merging at each level.
pub fn merge_json(target: &mut Value, source: Value) {
    match (target, source) {
        (Value::Object(target_map), Value::Object(source_map)) => {
            for (key, source_value) in source_map {
                match target_map.get_mut(&key) {
                    Some(target_value) => merge_json(target_value, source_value),
                    None => {
                        target_map.insert(key, source_value);
                    }
                }
            }
        }
        (target, source) => {
            *target = source;
        }
    }
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:62.0) Gecko/20100101 Firefox/62.0".into()
}
fn default_connect_timeout() -> u64 {
    30
}
fn default_read_timeout() -> u64 {
    300
}
fn default_deadline() -> u64 {
    900
}
fn default_batch_concurrency() -> usize {
    10
}
fn default_page_size() -> u32 {
    90
}
fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "pretty".into()
}
