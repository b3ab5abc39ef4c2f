//! Retry routing errors.

use rotor_ports::PortsError;

/// Errors raised while routing a failure.
#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    /// The transport rejected the message.
    #[error("publish failed: {0}")]
    Publish(#[from] PortsError),

    /// A retry header is missing or malformed.
    #[error("invalid `{name}` header: {reason}")]
    Header {
        /// Header name.
        name: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// The message could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RetryError {
    /// Convenience constructor for [`RetryError::Header`].
    pub fn header(name: &'static str, reason: impl Into<String>) -> Self {
        Self::Header {
            name,
            reason: reason.into(),
        }
    }

    /// Whether dispatching again may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Publish(e) if e.is_retryable())
    }
}
