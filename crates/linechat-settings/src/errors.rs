//! Failures while building [`LinechatSettings`](crate::LinechatSettings).

use thiserror::Error;

/// Why settings could not be loaded.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read settings file: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not JSON, or does not fit the settings schema.
    #[error("malformed settings: {0}")]
    Json(#[from] serde_json::Error),
    /// A value parsed but the server cannot run with it.
    #[error("invalid setting: {0}")]
    InvalidValue(String),
}

/// Shorthand used across the loader.
pub type Result<T> = std::result::Result<T, SettingsError>;
