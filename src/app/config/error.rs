//! Configuration errors

use crate::core::error_handling::ContextualError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Configuration file does not exist: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("Failed to read configuration file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl ContextualError for ConfigError {
    fn is_user_actionable(&self) -> bool {
        match self {
            ConfigError::InvalidValue { .. }
            | ConfigError::NotFound { .. }
            | ConfigError::Parse { .. } => true,
            ConfigError::Io { .. } => false,
        }
    }

    fn user_message(&self) -> Option<&str> {
        match self {
            ConfigError::InvalidValue { message, .. } => Some(message),
            ConfigError::NotFound { .. } => Some("the configuration file given does not exist"),
            ConfigError::Parse { .. } => Some("the configuration file is not valid TOML"),
            ConfigError::Io { .. } => None,
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;
