//! Consumer errors.

use rotor_ports::PortsError;

/// Errors raised by the consumer or its handler.
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    /// The configuration cannot work.
    #[error("invalid consumer configuration: {0}")]
    InvalidConfig(String),

    /// A queue operation failed.
    #[error("queue error: {0}")]
    Queue(#[from] PortsError),

    /// The handler could not process a message; it will be redelivered.
    #[error("handler failed: {0}")]
    Handler(String),
}

impl ConsumerError {
    /// Convenience constructor for [`ConsumerError::Handler`].
    pub fn handler(message: impl std::fmt::Display) -> Self {
        Self::Handler(message.to_string())
    }
}
