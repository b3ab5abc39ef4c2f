//! Warehouse errors.

use rotor_ports::PortsError;

/// Errors from the warehouse gateway.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WarehouseError {
    /// No configuration for the connection id.
    #[error("unknown warehouse connection: {0}")]
    UnknownConnection(String),

    /// The SQL references a parameter that was not supplied.
    #[error("missing query parameter: {0}")]
    MissingParameter(String),

    /// Transport failure talking to the database.
    #[error("warehouse transport error: {0}")]
    Transport(String),

    /// The database rejected the query.
    #[error("warehouse returned {status}: {body}")]
    Query {
        /// HTTP status.
        status: u16,
        /// Error text returned by the server.
        body: String,
    },

    /// A result row was not valid JSON.
    #[error("cannot decode warehouse row: {0}")]
    Decode(String),
}

impl WarehouseError {
    /// Transport failures and 5xx answers may succeed on retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Query { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for WarehouseError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<WarehouseError> for PortsError {
    fn from(err: WarehouseError) -> Self {
        match err {
            WarehouseError::UnknownConnection(id) => Self::not_found("Connection", id),
            WarehouseError::MissingParameter(_) => Self::InvalidArgument(err.to_string()),
            WarehouseError::Transport(msg) => Self::Connection(msg),
            WarehouseError::Query { .. } => Self::Backend(err.to_string()),
            WarehouseError::Decode(msg) => Self::Serialization(msg),
        }
    }
}
