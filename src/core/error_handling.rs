//! Generic error handling utilities
//!
//! Every subsystem error implements [`ContextualError`] so that top-level
//! code can decide between showing the error itself or a generic context
//! line with the details at debug level.

/// Errors that can tell a user-actionable problem from a system problem
///
/// When `is_user_actionable()` returns `true`, `user_message()` must return
/// `Some(message)`; otherwise it must return `None`.
pub trait ContextualError: std::error::Error {
    /// True for configuration and argument problems the user can fix
    fn is_user_actionable(&self) -> bool;

    /// The message to show the user for actionable errors
    fn user_message(&self) -> Option<&str>;
}

/// Log a failure with the level of detail appropriate for its kind
///
/// User-actionable errors are logged with their own message. System errors
/// are logged with the operation context, and the error details go to debug.
///
/// # Examples
/// ```rust,no_run
/// # use streamload::core::error_handling::log_error_with_context;
/// # use streamload::app::config::ConfigError;
/// let err = ConfigError::InvalidValue {
///     field: "producer.batch_size".to_string(),
///     message: "must be greater than 0".to_string(),
/// };
/// log_error_with_context(&err, "Loading configuration");
/// ```
pub fn log_error_with_context<E: ContextualError + std::fmt::Display + std::fmt::Debug>(
    error: &E,
    operation_context: &str,
) {
    match error.user_message() {
        Some(user_msg) if error.is_user_actionable() => {
            log::error!("{}: {}", operation_context, user_msg);
        }
        _ => {
            log::error!("{} failed: {}", operation_context, error);
        }
    }
    log::debug!("DEBUG_DETAILS: {:?}", error);
}
