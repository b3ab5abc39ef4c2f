//! Logging errors.

/// Errors raised while setting up logging.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// The level/filter directive could not be parsed.
    #[error("invalid filter `{directive}`: {reason}")]
    Filter {
        /// Directive as given.
        directive: String,
        /// Parser message.
        reason: String,
    },

    /// A global subscriber is already installed.
    #[error("logging already initialised")]
    AlreadyInitialised,
}

/// Result alias for this crate.
pub type LogResult<T> = Result<T, LogError>;
