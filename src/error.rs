//! Error types for the backoff governor's fallible surfaces.
//!
//! The governor itself never fails; these cover configuration loading and
//! signal parsing.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration failed validation.
    #[error("configuration error: {0}")]
    Config(String),

    /// Failed to read a configuration file.
    #[error("failed to read config at {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration file is not valid TOML for this schema.
    #[error("invalid config TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// A failure signal could not be parsed.
    #[error("invalid failure signal '{0}'")]
    InvalidSignal(String),

    /// Failed to serialize a snapshot.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
