//! Consumer-side payload errors

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProcessError {
    #[error("Message has no payload")]
    MissingPayload,

    #[error("Payload could not be decoded: {message}")]
    Decode { message: String },
}

impl crate::core::error_handling::ContextualError for ProcessError {
    fn is_user_actionable(&self) -> bool {
        false
    }

    fn user_message(&self) -> Option<&str> {
        None
    }
}

pub type ProcessResult<T> = Result<T, ProcessError>;
