//! Configuration for the sync engine and repositories.
//!
//! Configuration is plain data with defaults for every field, optionally
//! loaded from a TOML file:
//!
//! ```toml
//! poll_interval_ms = 5000
//! push_on_write = true
//!
//! [retry]
//! enabled = true
//! max_attempts = 8
//! base_delay_ms = 1000
//! max_delay_ms = 30000
//! jitter_ms = 500
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use sync_core::{Backoff, DEFAULT_MAX_ATTEMPTS};

/// Engine and repository configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SyncConfig {
    /// Pull interval while anyone is subscribed (default: 5000).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Push in the background right after each local write (default: true).
    #[serde(default = "default_push_on_write")]
    pub push_on_write: bool,
    /// Automatic retry of failed pushes.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Cap on id resampling before minting fails (default: 64).
    #[serde(default = "default_max_id_attempts")]
    pub max_id_attempts: u32,
    /// Update batches buffered per subscriber before it lags (default: 256).
    #[serde(default = "default_update_buffer")]
    pub update_buffer: usize,
}

/// Retry configuration for failed pushes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RetryConfig {
    /// Enable background retry (default: true).
    #[serde(default = "default_retry_enabled")]
    pub enabled: bool,
    /// Retries before giving up until the next write or poll (default: 8).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First retry delay (default: 1000).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Ceiling on the delay before jitter (default: 30000).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Upper bound on random jitter (default: 500).
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

// Default value functions
fn default_poll_interval_ms() -> u64 {
    5000
}

fn default_push_on_write() -> bool {
    true
}

fn default_max_id_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_update_buffer() -> usize {
    256
}

fn default_retry_enabled() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    8
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter_ms() -> u64 {
    500
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: default_retry_enabled(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

impl RetryConfig {
    /// Retry disabled.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Backoff schedule described by this configuration.
    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            Duration::from_millis(self.jitter_ms),
        )
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            push_on_write: default_push_on_write(),
            retry: RetryConfig::default(),
            max_id_attempts: default_max_id_attempts(),
            update_buffer: default_update_buffer(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<inline>"),
            source: e,
        })
    }

    /// Set the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Enable or disable the background push after each write.
    pub fn with_push_on_write(mut self, push_on_write: bool) -> Self {
        self.push_on_write = push_on_write;
        self
    }

    /// Replace the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the capacity of the update and change channels.
    pub fn with_update_buffer(mut self, update_buffer: usize) -> Self {
        self.update_buffer = update_buffer;
        self
    }

    /// Poll interval as a duration (at least 1ms).
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}
