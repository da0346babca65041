//! Configuration error types

use std::path::PathBuf;
use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileReadError(#[from] std::io::Error),

    #[error("Config file not found: {0:?}")]
    FileNotFound(PathBuf),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// Malformed value in a free-form field (a broker URL query, say)
    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    /// A `CONVEYOR_*` override that does not parse
    #[error("Environment override rejected: {0}")]
    EnvError(String),

    #[error("Invalid broker URL: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("Domain configuration error in {domain}: {message}")]
    DomainError { domain: String, message: String },
}
