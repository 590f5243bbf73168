//! Settings error types.

use thiserror::Error;

/// Errors that can occur when loading or parsing settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Failed to read the settings file from disk.
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    /// Failed to parse JSON in the settings file.
    #[error("failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// A value the relay cannot run with.
    #[error("invalid settings value for {key}: {message}")]
    InvalidValue {
        /// Dotted camelCase key, as written in the settings file.
        key: &'static str,
        /// What is wrong with it.
        message: String,
    },
}

impl SettingsError {
    /// Invalid value at `key`.
    pub fn invalid(key: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            key,
            message: message.into(),
        }
    }

    /// Offending key, for invalid values.
    pub fn key(&self) -> Option<&'static str> {
        match self {
            Self::InvalidValue { key, .. } => Some(*key),
            Self::Io(_) | Self::Json(_) => None,
        }
    }
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
