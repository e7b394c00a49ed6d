//! Error types for Gantry

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using GantryError
pub type Result<T> = std::result::Result<T, GantryError>;

/// Main error type for Gantry operations
#[derive(Debug, Error)]
pub enum GantryError {
    /// Configuration-related errors
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found at {0}")]
    NotFound(PathBuf),

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {message}")]
    InvalidValue { field: String, message: String },

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// IO error
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_message_passes_through() {
        let err = GantryError::from(ConfigError::NotFound(PathBuf::from("gantry.toml")));
        assert_eq!(err.to_string(), "Configuration file not found at gantry.toml");
        assert!(matches!(err, GantryError::Config(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_invalid_value_names_field() {
        let err = ConfigError::invalid("executor.max_concurrent", "must be at least 1");
        assert_eq!(
            err.to_string(),
            "Invalid configuration: executor.max_concurrent - must be at least 1"
        );
    }
}
