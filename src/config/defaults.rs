//! Typed configuration sections and their defaults
//!
//! Every field carries `#[serde(default)]`, so a partial document (or an empty
//! one) deserializes into a fully populated [`StowageConfig`]. Sections know
//! how to turn themselves into the runtime configuration of the component
//! they describe.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::media::{
    FetchConfig, StoreConfig, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_MAX_FILE_SIZE,
    DEFAULT_READ_TIMEOUT_MS,
};
use crate::policy::{StoragePolicy, DEFAULT_CLEANUP_INTERVAL_SECS, DEFAULT_MAX_LIFETIME_SECS};

/// Default number of bytes shown inline in a preview
pub const DEFAULT_MAX_INLINE_BYTES: usize = 4 * 1024;

/// Default log format
pub const DEFAULT_LOG_FORMAT: &str = "plaintext";

/// Default log level
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Accepted values for `logging.format`
pub const LOG_FORMATS: &[&str] = &["plaintext", "json"];

/// Accepted values for `logging.level`
pub const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

// ---------------------------------------------------------------------------
// Top level
// ---------------------------------------------------------------------------

/// Complete, defaulted configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StowageConfig {
    #[serde(default)]
    pub storage: StorageSection,

    #[serde(default)]
    pub download: DownloadSection,

    #[serde(default)]
    pub retention: RetentionSection,

    #[serde(default)]
    pub preview: PreviewSection,

    #[serde(default)]
    pub logging: LoggingSection,
}

// ---------------------------------------------------------------------------
// storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageSection {
    /// Directory holding one sub-directory per stored blob
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Per-blob size cap in bytes
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            max_file_size: default_max_file_size(),
        }
    }
}

impl StorageSection {
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::default()
            .with_base_dir(self.data_dir.clone())
            .with_max_file_size(self.max_file_size)
    }
}

fn default_data_dir() -> PathBuf {
    StoreConfig::default().base_dir
}
fn default_max_file_size() -> u64 {
    DEFAULT_MAX_FILE_SIZE
}

// ---------------------------------------------------------------------------
// download
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadSection {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

impl Default for DownloadSection {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl DownloadSection {
    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig::default()
            .with_connect_timeout_ms(self.connect_timeout_ms)
            .with_read_timeout_ms(self.read_timeout_ms)
    }
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}
fn default_read_timeout_ms() -> u64 {
    DEFAULT_READ_TIMEOUT_MS
}

// ---------------------------------------------------------------------------
// retention
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionSection {
    /// Entries older than this are evicted
    #[serde(default = "default_max_lifetime_secs")]
    pub max_lifetime_secs: u64,

    /// Time between eviction sweeps
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    /// Media types accepted for storage; empty accepts everything
    #[serde(default)]
    pub allowed_media_types: Vec<String>,
}

impl Default for RetentionSection {
    fn default() -> Self {
        Self {
            max_lifetime_secs: default_max_lifetime_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            allowed_media_types: Vec::new(),
        }
    }
}

impl RetentionSection {
    pub fn policy(&self) -> StoragePolicy {
        StoragePolicy::default()
            .with_max_lifetime(Duration::from_secs(self.max_lifetime_secs))
            .with_cleanup_period(Duration::from_secs(self.cleanup_interval_secs))
            .with_allowed_media_types(self.allowed_media_types.iter().cloned())
    }
}

fn default_max_lifetime_secs() -> u64 {
    DEFAULT_MAX_LIFETIME_SECS
}
fn default_cleanup_interval_secs() -> u64 {
    DEFAULT_CLEANUP_INTERVAL_SECS
}

// ---------------------------------------------------------------------------
// preview
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewSection {
    #[serde(default = "default_max_inline_bytes")]
    pub max_inline_bytes: usize,
}

impl Default for PreviewSection {
    fn default() -> Self {
        Self {
            max_inline_bytes: default_max_inline_bytes(),
        }
    }
}

fn default_max_inline_bytes() -> usize {
    DEFAULT_MAX_INLINE_BYTES
}

// ---------------------------------------------------------------------------
// logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingSection {
    /// `plaintext` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Default level when neither `STOWAGE_LOG` nor `RUST_LOG` is set
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            level: default_log_level(),
        }
    }
}

fn default_log_format() -> String {
    DEFAULT_LOG_FORMAT.to_string()
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
