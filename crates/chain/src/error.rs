//! Chain errors.

use rotor_core::FunctionError;
use rotor_ports::PortsError;
use rotor_sandbox::SandboxError;

/// Errors from building or running a chain.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// The chain definition is unusable.
    #[error("invalid chain definition: {0}")]
    InvalidDefinition(String),

    /// The sandbox for the chain could not be created.
    #[error("failed to build chain for {entity_id}: {source}")]
    Build {
        /// Entity the chain belongs to.
        entity_id: String,
        /// Underlying sandbox error.
        #[source]
        source: SandboxError,
    },

    /// A function failed in a way that aborts the whole run.
    #[error("function {function_id} failed: {error}")]
    Function {
        /// Failing function.
        function_id: String,
        /// What it threw.
        error: FunctionError,
    },

    /// A function asked for the event to be retried.
    #[error("retryable failure in {function_id}: {error}")]
    Retryable {
        /// Failing function.
        function_id: String,
        /// What it threw, with any partially transformed event attached.
        error: FunctionError,
        /// Input event of the run.
        original_event: serde_json::Value,
    },

    /// A port the run depends on failed.
    #[error(transparent)]
    Port(#[from] PortsError),
}

impl ChainError {
    /// Whether the retry router should handle this error.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Retryable { .. } => true,
            Self::Function { error, .. } => error.kind().is_retry(),
            Self::Port(err) => err.is_retryable(),
            Self::InvalidDefinition(_) | Self::Build { .. } => false,
        }
    }

    /// The error as a [`FunctionError`], for callers that report one shape.
    #[must_use]
    pub fn into_function_error(self) -> FunctionError {
        match self {
            Self::Retryable { error, .. } | Self::Function { error, .. } => error,
            Self::Build { source, .. } => source.into_function_error(),
            Self::Port(err) if err.is_retryable() => FunctionError::retry(err.to_string()),
            other => FunctionError::fatal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rotor_core::ErrorKind;

    #[test]
    fn build_errors_are_fatal() {
        let err = ChainError::Build {
            entity_id: "c1".into(),
            source: SandboxError::compile("f1", "import `env.abort` is not allowed"),
        };
        assert!(!err.is_retryable());
        assert_eq!(err.into_function_error().kind(), ErrorKind::Fatal);
    }

    #[test]
    fn retryable_keeps_the_thrown_error() {
        let err = ChainError::Retryable {
            function_id: "f1".into(),
            error: FunctionError::retry("later"),
            original_event: serde_json::json!({}),
        };
        assert!(err.is_retryable());
        assert_eq!(err.into_function_error().message, "later");
    }
}
