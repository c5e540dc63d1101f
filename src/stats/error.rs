//! Stats sink error types

#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    #[error("Metric registration failed: {source}")]
    Registration {
        #[source]
        source: prometheus::Error,
    },

    #[error("Metric encoding failed: {message}")]
    Encoding { message: String },
}

impl crate::core::error_handling::ContextualError for StatsError {
    fn is_user_actionable(&self) -> bool {
        false
    }

    fn user_message(&self) -> Option<&str> {
        None
    }
}

pub type StatsResult<T> = Result<T, StatsError>;

impl From<prometheus::Error> for StatsError {
    fn from(source: prometheus::Error) -> Self {
        StatsError::Registration { source }
    }
}
