//! Broker collaborator error types

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BrokerError {
    #[error("Connection failed: {message}")]
    Connection { message: String },

    #[error("{client} client is not connected")]
    NotConnected { client: String },

    #[error("Send to topic '{topic}' failed: {message}")]
    Send { topic: String, message: String },

    #[error("Fetch failed: {message}")]
    Fetch { message: String },

    #[error("Administrative call '{operation}' failed: {message}")]
    Admin { operation: String, message: String },

    #[error("Unknown topic: {topic}")]
    UnknownTopic { topic: String },

    #[error(
        "Negative lag on {topic}/{partition}: latest offset {latest} is behind committed offset {committed}"
    )]
    NegativeLag {
        topic: String,
        partition: i32,
        latest: i64,
        committed: i64,
    },

    #[error("Broker connection closed")]
    Closed,

    #[error("Consumer is already delivering batches")]
    AlreadyRunning,

    #[error("Internal broker error: {message}")]
    Internal { message: String },
}

impl BrokerError {
    /// Errors after which a loop cannot make progress on its own
    pub fn is_transport_loss(&self) -> bool {
        matches!(self, BrokerError::Closed | BrokerError::NotConnected { .. })
    }
}

impl crate::core::error_handling::ContextualError for BrokerError {
    fn is_user_actionable(&self) -> bool {
        false
    }

    fn user_message(&self) -> Option<&str> {
        None
    }
}

/// Result type for broker collaborator operations
pub type BrokerResult<T> = Result<T, BrokerError>;
