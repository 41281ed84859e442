//! Why loading settings failed.

use thiserror::Error;

/// Failure while reading, decoding or validating settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read settings: {0}")]
    Io(#[from] std::io::Error),
    /// The file, or the merged document, is not valid settings JSON.
    #[error("malformed settings: {0}")]
    Json(#[from] serde_json::Error),
    /// Decoded fine but breaks a constraint.
    #[error("rejected setting: {0}")]
    InvalidValue(String),
}

/// Settings result alias.
pub type Result<T> = std::result::Result<T, SettingsError>;
