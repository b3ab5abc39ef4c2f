//! Error types for port operations.
//!
//! Every port method returns `Result<_, PortsError>`. Backend drivers map
//! their internal errors into these variants so the engine can make
//! retry decisions without knowing the concrete backend.

use std::time::Duration;

/// Error type for all port operations.
#[derive(Debug, thiserror::Error)]
pub enum PortsError {
    /// Entity not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of entity (e.g. "Connection", "Message").
        entity: String,
        /// Identifier that was looked up.
        id: String,
    },

    /// Backend connection failure.
    #[error("connection error: {0}")]
    Connection(String),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Operation exceeded its timeout.
    #[error("timeout: {operation} after {duration:?}")]
    Timeout {
        /// Name of the operation that timed out.
        operation: String,
        /// How long was waited before giving up.
        duration: Duration,
    },

    /// The caller supplied an unusable argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation exists in the contract but is deliberately unsupported.
    #[error("{0} is not implemented")]
    NotImplemented(String),

    /// The backend answered with an error.
    #[error("backend error: {0}")]
    Backend(String),

    /// Catch-all internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PortsError {
    /// Convenience constructor for [`PortsError::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Convenience constructor for [`PortsError::Timeout`].
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Convenience constructor for [`PortsError::NotImplemented`].
    pub fn not_implemented(what: impl Into<String>) -> Self {
        Self::NotImplemented(what.into())
    }

    /// Returns `true` for transient errors that may be retried.
    ///
    /// Currently [`Connection`](Self::Connection) and [`Timeout`](Self::Timeout).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout { .. })
    }
}

impl From<serde_json::Error> for PortsError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
