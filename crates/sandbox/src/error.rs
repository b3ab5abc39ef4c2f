//! Sandbox errors.

use rotor_core::{DisposeReason, FunctionError};

/// Errors from creating or invoking a sandbox.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// The wasmtime engine could not be configured.
    #[error("sandbox engine error: {0}")]
    Engine(String),

    /// A function failed to compile, link or instantiate. Never retried.
    #[error("compile error in {function_id}: {message}")]
    Compile {
        /// Offending function.
        function_id: String,
        /// Diagnostic.
        message: String,
    },

    /// No function with this id lives in the sandbox.
    #[error("unknown function: {0}")]
    UnknownFunction(String),

    /// The entry point is not exported by the function.
    #[error("function {function_id} does not export `{export}`")]
    MissingExport {
        /// Function looked up.
        function_id: String,
        /// Missing export.
        export: String,
    },

    /// The guest broke the calling convention.
    #[error("guest ABI violation: {0}")]
    Abi(String),

    /// The sandbox is gone. `during_call` is `false` when the call never
    /// reached user code.
    #[error("sandbox disposed ({reason}){}", call_suffix(.during_call))]
    Disposed {
        /// Why it was disposed.
        reason: DisposeReason,
        /// Disposal happened while this call was running.
        during_call: bool,
    },

    /// User code threw, or trapped.
    #[error("{0}")]
    Thrown(FunctionError),
}

fn call_suffix(during_call: &bool) -> &'static str {
    if *during_call { " during call" } else { "" }
}

impl SandboxError {
    /// Convenience constructor for [`SandboxError::Compile`].
    pub fn compile(function_id: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Compile {
            function_id: function_id.into(),
            message: message.to_string(),
        }
    }

    /// Whether this is a disposal error.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        matches!(self, Self::Disposed { .. })
    }

    /// The error as seen by the pipeline.
    ///
    /// Disposal becomes a `SandboxDisposedError` (droppable and retryable),
    /// compile errors are fatal, everything else is unclassified.
    #[must_use]
    pub fn into_function_error(self) -> FunctionError {
        match self {
            Self::Thrown(err) => err,
            Self::Disposed { reason, .. } => {
                let message = match reason {
                    DisposeReason::Timeout => "function timed out; sandbox disposed",
                    DisposeReason::MemoryExhausted => "function ran out of memory; sandbox disposed",
                    DisposeReason::Explicit => "sandbox was disposed",
                };
                FunctionError::sandbox_disposed(reason, message)
            }
            Self::Compile { .. } | Self::Engine(_) => FunctionError::fatal(self.to_string()),
            other => FunctionError::plain(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rotor_core::ErrorKind;

    #[test]
    fn disposal_maps_to_drop_retry_with_reason() {
        let err = SandboxError::Disposed {
            reason: DisposeReason::MemoryExhausted,
            during_call: true,
        }
        .into_function_error();
        assert_eq!(err.kind(), ErrorKind::DropRetry);
        assert_eq!(err.dispose_reason, Some(DisposeReason::MemoryExhausted));
    }

    #[test]
    fn compile_is_fatal() {
        let err = SandboxError::compile("f1", "bad import").into_function_error();
        assert_eq!(err.kind(), ErrorKind::Fatal);
    }

    #[test]
    fn thrown_passes_through() {
        let thrown = FunctionError::drop("skip");
        let err = SandboxError::Thrown(thrown.clone()).into_function_error();
        assert_eq!(err, thrown);
    }

    #[test]
    fn display() {
        let err = SandboxError::Disposed {
            reason: DisposeReason::Timeout,
            during_call: false,
        };
        assert_eq!(err.to_string(), "sandbox disposed (timeout)");
        let err = SandboxError::Disposed {
            reason: DisposeReason::Timeout,
            during_call: true,
        };
        assert_eq!(err.to_string(), "sandbox disposed (timeout) during call");
    }
}
