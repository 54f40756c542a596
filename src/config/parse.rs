use super::types::*;
use crate::config::{expand_env_vars, expand_tilde, unexpanded_env_vars};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// CloudWatch Logs accepts at most this many events per put.
pub const MAX_EVENTS_LIMIT: usize = 10_000;
/// CloudWatch Logs accepts at most this many bytes per put, counting each
/// event as its message length plus [`EVENT_OVERHEAD_BYTES`].
pub const MAX_BYTES_LIMIT: usize = 1_048_576;
/// Per-event bytes CloudWatch Logs adds on top of the message length.
/// `batch.max_bytes` counts message bytes only.
pub const EVENT_OVERHEAD_BYTES: usize = 26;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("missing required setting: {0}")]
    Missing(String),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;
    parse_config(&raw)
}

/// Parse a YAML config document, expanding `$env{VAR}` references and `~` paths.
pub fn parse_config(yaml: &str) -> Result<Config, ConfigError> {
    let yaml = expand_env_vars(yaml);
    check_unexpanded_vars(&yaml)?;

    let mut config: Config = serde_yaml::from_str(&yaml)?;
    config.source.path = expand_tilde(&config.source.path);

    validate_config(&config)?;
    Ok(config)
}

impl Config {
    /// Build a config from `LOG_GROUP`, `LOG_STREAM`, `LOG_FILE`, `AWS_REGION`
    /// and `CW_ENDPOINT`, read through `lookup`.
    pub fn from_env<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ConfigError::Missing(name.to_string()))
        };

        let config = Config {
            source: SourceConfig {
                path: expand_tilde(&PathBuf::from(required("LOG_FILE")?)),
                sentinel: DEFAULT_SENTINEL.to_string(),
            },
            destination: DestinationConfig {
                log_group: required("LOG_GROUP")?,
                log_stream: required("LOG_STREAM")?,
                region: lookup("AWS_REGION").unwrap_or_else(|| DEFAULT_REGION.to_string()),
                endpoint: lookup("CW_ENDPOINT").filter(|v| !v.trim().is_empty()),
                timeout: None,
            },
            batch: BatchConfig::default(),
        };

        validate_config(&config)?;
        Ok(config)
    }
}

fn check_unexpanded_vars(yaml: &str) -> Result<(), ConfigError> {
    let unexpanded = unexpanded_env_vars(yaml);
    match unexpanded.len() {
        0 => Ok(()),
        1 => Err(ConfigError::Validation(format!(
            "environment variable $env{{{0}}} is not set; export {0} or replace the reference",
            unexpanded[0]
        ))),
        _ => Err(ConfigError::Validation(format!(
            "environment variables are not set: {}",
            unexpanded.join(", ")
        ))),
    }
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if config.source.path.as_os_str().is_empty() {
        errors.push("source.path must not be empty".to_string());
    }
    if config.source.sentinel.trim().is_empty() {
        errors.push("source.sentinel must not be blank".to_string());
    }
    if config.destination.log_group.trim().is_empty() {
        errors.push("destination.log_group must not be empty".to_string());
    }
    if config.destination.log_stream.trim().is_empty() {
        errors.push("destination.log_stream must not be empty".to_string());
    }
    if config.destination.region.trim().is_empty() {
        errors.push("destination.region must not be empty".to_string());
    }

    let batch = &config.batch;
    let events_ok = (1..=MAX_EVENTS_LIMIT).contains(&batch.max_events);
    let bytes_ok = (1..=MAX_BYTES_LIMIT).contains(&batch.max_bytes);
    if !events_ok {
        errors.push(format!(
            "batch.max_events must be between 1 and {}, got {}",
            MAX_EVENTS_LIMIT, batch.max_events
        ));
    }
    if !bytes_ok {
        errors.push(format!(
            "batch.max_bytes must be between 1 and {}, got {}",
            MAX_BYTES_LIMIT, batch.max_bytes
        ));
    }
    if events_ok && bytes_ok {
        let put_size = batch.max_bytes + batch.max_events * EVENT_OVERHEAD_BYTES;
        if put_size > MAX_BYTES_LIMIT {
            errors.push(format!(
                "batch.max_bytes plus {} bytes per event ({} for {} events) exceeds the {} byte put limit; lower max_bytes or max_events",
                EVENT_OVERHEAD_BYTES, put_size, batch.max_events, MAX_BYTES_LIMIT
            ));
        }
    }
    if batch.poll_interval.is_zero() {
        errors.push("batch.poll_interval must be greater than zero".to_string());
    }

    match errors.len() {
        0 => Ok(()),
        1 => Err(ConfigError::Validation(errors.remove(0))),
        _ => Err(ConfigError::ValidationList(errors)),
    }
}
