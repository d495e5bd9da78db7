// Configuration errors, keyed by the file, variable or dotted key at fault

use crate::loader::FileFormat;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration key not found: {0}")]
    KeyNotFound(String),

    #[error("Cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported configuration file {}: expected .json, .toml or .env", .path.display())]
    UnsupportedFormat { path: PathBuf },

    #[error("Invalid {format} configuration: {message}")]
    Parse { format: FileFormat, message: String },

    #[error("Cannot load .env file: {0}")]
    Dotenv(#[from] dotenvy::Error),

    #[error("Environment variable {var}: {source}")]
    Env {
        var: String,
        #[source]
        source: std::env::VarError,
    },

    #[error("Invalid value for '{key}': {message}")]
    Invalid { key: String, message: String },

    #[error("Value at '{key}' has the wrong type: {source}")]
    Type {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Cannot store '{key}': {source}")]
    Store {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Configuration does not fit the expected settings: {0}")]
    Shape(#[source] serde_json::Error),
}

impl ConfigError {
    pub fn invalid(key: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key: key.into(),
            message: message.into(),
        }
    }

    /// The dotted key or variable the error is about, if any.
    pub fn key(&self) -> Option<&str> {
        match self {
            ConfigError::KeyNotFound(key)
            | ConfigError::Invalid { key, .. }
            | ConfigError::Type { key, .. }
            | ConfigError::Store { key, .. } => Some(key),
            ConfigError::Env { var, .. } => Some(var),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
