//! Top-level application errors

use crate::app::config::ConfigError;
use crate::core::controller::ControlError;
use crate::core::error_handling::ContextualError;
use crate::stats::StatsError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Control(#[from] ControlError),

    #[error(transparent)]
    Stats(#[from] StatsError),

    #[error("Failed to initialise logging: {message}")]
    Logging { message: String },

    #[error("Failed to build the async runtime: {source}")]
    Runtime {
        #[source]
        source: std::io::Error,
    },
}

impl ContextualError for AppError {
    fn is_user_actionable(&self) -> bool {
        match self {
            AppError::Config(error) => error.is_user_actionable(),
            AppError::Control(error) => error.is_user_actionable(),
            AppError::Stats(error) => error.is_user_actionable(),
            AppError::Logging { .. } => true,
            AppError::Runtime { .. } => false,
        }
    }

    fn user_message(&self) -> Option<&str> {
        match self {
            AppError::Config(error) => error.user_message(),
            AppError::Control(error) => error.user_message(),
            AppError::Stats(error) => error.user_message(),
            AppError::Logging { message } => Some(message),
            AppError::Runtime { .. } => None,
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
