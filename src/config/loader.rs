//! Configuration loading from disk, flags, and the environment.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::schema::ServerConfig;
use crate::config::validation::{validate_config, ValidationError};
use crate::observability::LogFormat;

/// Environment variable overriding `listener.bind_address`.
pub const ENV_ADDRESS: &str = "ADDRESS";
/// Environment variable overriding `observability.log_level`.
pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";
/// Environment variable overriding `observability.log_format`.
pub const ENV_LOG_FORMAT: &str = "LOG_FORMAT";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),

    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidOverride {
        key: &'static str,
        value: String,
        reason: String,
    },
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse a TOML document without semantic validation.
pub fn parse_config(content: &str) -> Result<ServerConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    finish(read_config(path)?)
}

/// Bind address with an empty host (`:8080`) expanded to all interfaces.
pub fn normalize_bind_address(address: &str) -> String {
    if address.starts_with(':') {
        format!("0.0.0.0{address}")
    } else {
        address.to_string()
    }
}

fn finish(mut config: ServerConfig) -> Result<ServerConfig, ConfigError> {
    validate_config(&config).map_err(ConfigError::Validation)?;
    config.listener.bind_address = normalize_bind_address(&config.listener.bind_address);
    Ok(config)
}

fn read_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content)
}

/// Apply `ADDRESS`, `LOG_LEVEL`, and `LOG_FORMAT` found through `lookup`.
///
/// Unset and empty variables are ignored.
pub fn apply_env_overrides<F>(config: &mut ServerConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|value| !value.is_empty());

    if let Some(address) = get(ENV_ADDRESS) {
        config.listener.bind_address = address;
    }
    if let Some(level) = get(ENV_LOG_LEVEL) {
        config.observability.log_level = level;
    }
    if let Some(format) = get(ENV_LOG_FORMAT) {
        let parsed = format.parse::<LogFormat>().map_err(|reason| ConfigError::InvalidOverride {
            key: ENV_LOG_FORMAT,
            value: format.clone(),
            reason,
        })?;
        config.observability.log_format = parsed;
    }
    Ok(())
}

/// Build the effective configuration.
///
/// Sources, later overriding earlier: defaults, the optional TOML file,
/// the `address` flag, then the environment. The result is validated.
pub fn resolve_config<F>(
    path: Option<&Path>,
    address: Option<String>,
    env: F,
) -> Result<ServerConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match path {
        Some(path) => read_config(path)?,
        None => ServerConfig::default(),
    };
    if let Some(address) = address {
        config.listener.bind_address = address;
    }
    apply_env_overrides(&mut config, env)?;
    finish(config)
}
