//! Configuration management for the reportd server.
//!
//! This module provides configuration loading with multiple sources:
//! 1. Default values (hardcoded)
//! 2. Configuration file (YAML)
//! 3. Environment variables (override)
//!
//! # Configuration Hierarchy
//!
//! Environment variables take precedence over config file values,
//! which take precedence over defaults. This follows the 12-factor app pattern.
//!
//! # Example
//!
//! ```ignore
//! use reportd_server::config::ReportdConfig;
//!
//! // Load from file with env overrides
//! let config = ReportdConfig::load("config.yaml")?;
//!
//! // Or load from environment only
//! let config = ReportdConfig::from_env()?;
//! ```

use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ReportdConfig {
    /// Upstream report service settings
    #[serde(default)]
    pub upstream: UpstreamSettings,

    /// Batch orchestration settings
    #[serde(default)]
    pub batch: BatchSettings,

    /// Filter cache settings
    #[serde(default)]
    pub cache: CacheSettings,

    /// Job store settings
    #[serde(default)]
    pub storage: StorageSettings,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Upstream report service settings.
///
/// These settings can be overridden via environment variables with the
/// `REPORTD_` prefix and `__` as the nested key separator:
///
/// - `REPORTD_UPSTREAM__BASE_URL=https://reports.example.com` - base URL for
///   relative endpoints
/// - `REPORTD_UPSTREAM__ALLOWLIST=example.com,10.20.0.0/16` - permitted
///   absolute endpoint hosts
/// - `REPORTD_UPSTREAM__TIMEOUT_SECS=60` - per-call timeout
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct UpstreamSettings {
    /// Base URL that relative endpoint designators resolve against.
    /// When unset, relative endpoints are rejected.
    pub base_url: Option<String>,

    /// Comma-separated allowlist of permitted hosts for absolute endpoints
    /// (exact host, IP, or IPv4 CIDR). When unset, absolute endpoints are
    /// rejected outright.
    pub allowlist: Option<String>,

    /// Per-call timeout for upstream requests, in seconds.
    #[serde(default = "default_upstream_timeout")]
    pub timeout_secs: u64,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            allowlist: None,
            timeout_secs: default_upstream_timeout(),
        }
    }
}

impl UpstreamSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_upstream_timeout() -> u64 {
    30
}

/// Batch orchestration settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct BatchSettings {
    /// Number of worker tasks draining the job queue.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Maximum concurrently in-flight items within one job.
    #[serde(default = "default_item_concurrency")]
    pub item_concurrency: usize,

    /// Maximum parameter sets accepted per submission.
    #[serde(default = "default_max_items")]
    pub max_items: usize,

    /// Ceiling on the declared expected-row total per submission.
    /// Unset means no ceiling.
    pub max_records: Option<u64>,

    /// Bounded job queue capacity; submissions past it are rejected.
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    /// Job record TTL in seconds.
    #[serde(default = "default_job_ttl")]
    pub job_ttl_secs: u64,

    /// Result file TTL in seconds, independent of the job record TTL.
    #[serde(default = "default_results_ttl")]
    pub results_ttl_secs: u64,

    /// Serialized-results size above which the payload moves to a file.
    #[serde(default = "default_max_result_bytes")]
    pub max_result_bytes: u64,

    /// Directory for file-backed result payloads.
    #[serde(default = "default_results_dir")]
    pub results_dir: String,

    /// Interval between result file sweeps, in seconds.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            item_concurrency: default_item_concurrency(),
            max_items: default_max_items(),
            max_records: None,
            queue_size: default_queue_size(),
            job_ttl_secs: default_job_ttl(),
            results_ttl_secs: default_results_ttl(),
            max_result_bytes: default_max_result_bytes(),
            results_dir: default_results_dir(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl BatchSettings {
    pub fn job_ttl(&self) -> Duration {
        Duration::from_secs(self.job_ttl_secs)
    }

    pub fn results_ttl(&self) -> Duration {
        Duration::from_secs(self.results_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn default_workers() -> usize {
    2
}

fn default_item_concurrency() -> usize {
    5
}

fn default_max_items() -> usize {
    100
}

fn default_queue_size() -> usize {
    100
}

fn default_job_ttl() -> u64 {
    3600
}

fn default_results_ttl() -> u64 {
    3600
}

fn default_max_result_bytes() -> u64 {
    2 * 1024 * 1024
}

fn default_results_dir() -> String {
    "./report_results".to_string()
}

fn default_sweep_interval() -> u64 {
    60
}

/// Filter cache settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CacheSettings {
    /// Entry TTL in seconds.
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,

    /// Hard upper bound on cached value sets.
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl(),
            max_entries: default_cache_max_entries(),
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

fn default_cache_ttl() -> u64 {
    30
}

fn default_cache_max_entries() -> usize {
    20
}

/// Job store settings.
///
/// A set `redis_url` selects the Redis-backed store, which is required when
/// submission and workers run in separate processes. Unset selects the
/// in-memory store.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct StorageSettings {
    /// Redis connection URL, e.g. `redis://localhost:6379/0`.
    pub redis_url: Option<String>,
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LoggingSettings {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Use JSON format (true for production, false for development)
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

impl ReportdConfig {
    /// Load configuration from a YAML file with environment variable overrides.
    ///
    /// Environment variables are prefixed with `REPORTD_` and use `__` as
    /// separator. For example:
    /// - `REPORTD_BATCH__WORKERS=4` overrides `batch.workers`
    /// - `REPORTD_STORAGE__REDIS_URL=...` overrides `storage.redis_url`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigLoadError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        let config = Config::builder()
            .add_source(Config::try_from(&ReportdConfig::default())?)
            .add_source(File::from(path).format(FileFormat::Yaml))
            .add_source(
                Environment::with_prefix("REPORTD")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let loaded: ReportdConfig = config.try_deserialize()?;
        loaded.validate()?;

        Ok(loaded)
    }

    /// Load configuration from environment variables only.
    ///
    /// Uses default values and allows overrides via REPORTD_ prefixed env vars.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        let config = Config::builder()
            .add_source(Config::try_from(&ReportdConfig::default())?)
            .add_source(
                Environment::with_prefix("REPORTD")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let loaded: ReportdConfig = config.try_deserialize()?;
        loaded.validate()?;

        Ok(loaded)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        fn require_nonzero(value: usize, key: &str) -> Result<(), ConfigLoadError> {
            if value == 0 {
                return Err(ConfigLoadError::Invalid {
                    message: format!("{key} must be greater than 0"),
                });
            }
            Ok(())
        }

        require_nonzero(self.batch.workers, "batch.workers")?;
        require_nonzero(self.batch.item_concurrency, "batch.item_concurrency")?;
        require_nonzero(self.batch.max_items, "batch.max_items")?;
        require_nonzero(self.batch.queue_size, "batch.queue_size")?;

        if self.batch.max_result_bytes == 0 {
            return Err(ConfigLoadError::Invalid {
                message: "batch.max_result_bytes must be greater than 0".to_string(),
            });
        }

        for (value, key) in [
            (self.batch.job_ttl_secs, "batch.job_ttl_secs"),
            (self.batch.results_ttl_secs, "batch.results_ttl_secs"),
            (self.cache.ttl_secs, "cache.ttl_secs"),
        ] {
            if value == 0 {
                return Err(ConfigLoadError::Invalid {
                    message: format!("{key} must be greater than 0"),
                });
            }
        }

        if self.batch.results_dir.trim().is_empty() {
            return Err(ConfigLoadError::Invalid {
                message: "batch.results_dir must not be empty".to_string(),
            });
        }

        if let Some(base_url) = self.upstream.base_url.as_deref() {
            if url::Url::parse(base_url).is_err() {
                return Err(ConfigLoadError::Invalid {
                    message: format!("upstream.base_url is not a valid URL: {base_url}"),
                });
            }
        }

        if self
            .storage
            .redis_url
            .as_deref()
            .is_some_and(|s| s.trim().is_empty())
        {
            return Err(ConfigLoadError::Invalid {
                message: "storage.redis_url must not be empty when set".to_string(),
            });
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigLoadError::Invalid {
                message: format!(
                    "logging.level must be one of: {:?}, got: {}",
                    valid_levels, self.logging.level
                ),
            });
        }

        Ok(())
    }
}
