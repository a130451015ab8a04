//! Configuration loading
//!
//! Reads a JSON5 document, substitutes `${VAR}` references from the
//! environment and deserializes the result into a typed, defaulted
//! [`StowageConfig`]. A missing file is not an error: every setting has a
//! default.

pub mod defaults;

pub use defaults::{
    DownloadSection, LoggingSection, PreviewSection, RetentionSection, StorageSection,
    StowageConfig,
};

use regex::Regex;
use serde_json::Value;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;

/// Environment variable overriding the config file location
pub const CONFIG_PATH_ENV: &str = "STOWAGE_CONFIG_PATH";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse JSON5 at {path}: {message}")]
    ParseError { path: String, message: String },

    #[error("Failed to read config file {path}: {message}")]
    ReadError { path: String, message: String },

    #[error("Missing environment variable: {var}")]
    MissingEnvVar { var: String },

    #[error("Validation error at {path}: {message}")]
    ValidationError { path: String, message: String },
}

/// Get the config file path.
/// Priority: explicit path > STOWAGE_CONFIG_PATH > ~/.stowage/stowage.json5
/// Falls back to .json extension if the .json5 file doesn't exist.
pub fn get_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }

    if let Ok(path) = env::var(CONFIG_PATH_ENV) {
        return PathBuf::from(path);
    }

    let base = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".stowage");
    let json5 = base.join("stowage.json5");
    if json5.exists() {
        return json5;
    }
    base.join("stowage.json")
}

/// Load the configuration from the resolved config path.
pub fn load_config(explicit: Option<&Path>) -> Result<StowageConfig, ConfigError> {
    load_config_from(&get_config_path(explicit))
}

/// Load, substitute, deserialize and validate the config at `path`.
///
/// Returns all defaults when the file doesn't exist.
pub fn load_config_from(path: &Path) -> Result<StowageConfig, ConfigError> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "No config file, using defaults");
        return Ok(StowageConfig::default());
    }

    let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    parse_config(&content, path)
}

/// Parse config text that was read from `path`
pub fn parse_config(content: &str, path: &Path) -> Result<StowageConfig, ConfigError> {
    let mut value = parse_json5(content, path)?;
    substitute_env_vars(&mut value)?;

    let config: StowageConfig =
        serde_json::from_value(value).map_err(|e| ConfigError::ParseError {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

    validate_config(&config)?;
    Ok(config)
}

/// Parse JSON5 content
fn parse_json5(content: &str, path: &Path) -> Result<Value, ConfigError> {
    json5::from_str(content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Substitute environment variables in string values.
/// Pattern: ${VAR} where VAR matches [A-Z_][A-Z0-9_]*
/// Escape with $${VAR} to get literal ${VAR}
fn substitute_env_vars(value: &mut Value) -> Result<(), ConfigError> {
    match value {
        Value::String(s) => {
            *s = substitute_env_in_string(s)?;
        }
        Value::Object(obj) => {
            for (_, v) in obj.iter_mut() {
                substitute_env_vars(v)?;
            }
        }
        Value::Array(arr) => {
            for item in arr.iter_mut() {
                substitute_env_vars(item)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Substitute environment variables in a single string
fn substitute_env_in_string(s: &str) -> Result<String, ConfigError> {
    static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\$\$?\{([A-Z_][A-Z0-9_]*)\}").expect("env var pattern")
    });

    let mut result = String::with_capacity(s.len());
    let mut last_end = 0;

    for caps in ENV_VAR_PATTERN.captures_iter(s) {
        let (Some(full_match), Some(var)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let var_name = var.as_str();

        result.push_str(&s[last_end..full_match.start()]);

        if full_match.as_str().starts_with("$$") {
            result.push_str(&format!("${{{}}}", var_name));
        } else {
            let value = env::var(var_name).map_err(|_| ConfigError::MissingEnvVar {
                var: var_name.to_string(),
            })?;
            result.push_str(&value);
        }

        last_end = full_match.end();
    }

    result.push_str(&s[last_end..]);

    Ok(result)
}

/// Reject settings that would make a component unusable
pub fn validate_config(config: &StowageConfig) -> Result<(), ConfigError> {
    fn invalid(path: &str, message: impl Into<String>) -> ConfigError {
        ConfigError::ValidationError {
            path: path.to_string(),
            message: message.into(),
        }
    }

    if config.storage.max_file_size == 0 {
        return Err(invalid("storage.maxFileSize", "must be greater than 0"));
    }
    if config.download.connect_timeout_ms == 0 {
        return Err(invalid("download.connectTimeoutMs", "must be greater than 0"));
    }
    if config.download.read_timeout_ms == 0 {
        return Err(invalid("download.readTimeoutMs", "must be greater than 0"));
    }
    if config.retention.cleanup_interval_secs == 0 {
        return Err(invalid(
            "retention.cleanupIntervalSecs",
            "must be greater than 0",
        ));
    }

    let format = config.logging.format.to_ascii_lowercase();
    if !defaults::LOG_FORMATS.contains(&format.as_str()) {
        return Err(invalid(
            "logging.format",
            format!(
                "unknown format '{}', expected one of {:?}",
                config.logging.format,
                defaults::LOG_FORMATS
            ),
        ));
    }
    let level = config.logging.level.to_ascii_lowercase();
    if !defaults::LOG_LEVELS.contains(&level.as_str()) {
        return Err(invalid(
            "logging.level",
            format!(
                "unknown level '{}', expected one of {:?}",
                config.logging.level,
                defaults::LOG_LEVELS
            ),
        ));
    }

    Ok(())
}
