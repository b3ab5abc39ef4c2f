//! Function error taxonomy.
//!
//! A [`FunctionError`] is what crosses the sandbox boundary when user code
//! throws. Its `name` is the wire-level discriminator; [`ErrorKind`] is the
//! classification the pipeline acts on.

use serde::{Deserialize, Serialize};

use crate::retry_policy::RetryPolicy;

/// Wire name of an intentional drop.
pub const DROP_ERROR: &str = "DropError";
/// Wire name of a retryable error.
pub const RETRY_ERROR: &str = "RetryError";
/// Wire name of an error that drops the event now and retries it later.
pub const DROP_RETRY_ERROR: &str = "Drop & RetryError";
/// Wire name of an error that must never be retried.
pub const FATAL_ERROR: &str = "FatalError";
/// Wire name of the error raised when a sandbox was torn down.
pub const SANDBOX_DISPOSED_ERROR: &str = "SandboxDisposedError";
/// Wire name of a plain, unclassified error.
pub const PLAIN_ERROR: &str = "Error";

/// How the pipeline treats a thrown error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Terminal for the event; not a failure, never retried.
    Drop,
    /// Requeue with back-off.
    Retry,
    /// Remove the event from the current run and retry it later.
    DropRetry,
    /// Propagate to the caller; no automatic handling.
    Fatal,
    /// Anything else. Treated as retryable with the default policy.
    Unclassified,
}

impl ErrorKind {
    /// Canonical wire name for this kind.
    #[must_use]
    pub const fn wire_name(self) -> &'static str {
        match self {
            Self::Drop => DROP_ERROR,
            Self::Retry => RETRY_ERROR,
            Self::DropRetry => DROP_RETRY_ERROR,
            Self::Fatal => FATAL_ERROR,
            Self::Unclassified => PLAIN_ERROR,
        }
    }

    /// Classify a wire name. Unknown names are [`ErrorKind::Unclassified`].
    #[must_use]
    pub fn from_wire_name(name: &str) -> Self {
        match name {
            DROP_ERROR => Self::Drop,
            RETRY_ERROR | "Retry Error" => Self::Retry,
            DROP_RETRY_ERROR | "DropRetryError" | SANDBOX_DISPOSED_ERROR => Self::DropRetry,
            FATAL_ERROR => Self::Fatal,
            _ => Self::Unclassified,
        }
    }

    /// Errors `check_error` re-throws to the retry router.
    #[must_use]
    pub const fn is_retry(self) -> bool {
        matches!(self, Self::Retry | Self::DropRetry)
    }

    /// Errors that remove the event from the current run.
    #[must_use]
    pub const fn drops_event(self) -> bool {
        matches!(self, Self::Drop | Self::DropRetry)
    }
}

/// Why a sandbox was disposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisposeReason {
    /// An invocation exceeded its wall-clock deadline.
    Timeout,
    /// The guest tried to grow memory past the sandbox ceiling.
    MemoryExhausted,
    /// Disposed by its owner (code change, eviction, shutdown).
    Explicit,
}

impl std::fmt::Display for DisposeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::MemoryExhausted => write!(f, "memory"),
            Self::Explicit => write!(f, "disposed"),
        }
    }
}

/// An error thrown by a function.
///
/// Serialized in camelCase so guests can produce it directly:
///
/// ```json
/// {"name": "RetryError", "message": "upstream 503", "retryPolicy": {"max": 3}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("{name}: {message}")]
pub struct FunctionError {
    /// Wire-level discriminator, see [`ErrorKind::from_wire_name`].
    #[serde(default = "default_name")]
    pub name: String,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
    /// Stack or trap backtrace, if the guest supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    /// Partially transformed event attached by the thrower.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<serde_json::Value>,
    /// Retry policy attached by the thrower or the function's meta.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
    /// Function that raised the error. Filled in by the chain runner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_id: Option<String>,
    /// Set when the error comes from a sandbox teardown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispose_reason: Option<DisposeReason>,
}

fn default_name() -> String {
    PLAIN_ERROR.to_owned()
}

impl FunctionError {
    /// Create an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            name: kind.wire_name().to_owned(),
            message: message.into(),
            stack: None,
            event: None,
            retry_policy: None,
            function_id: None,
            dispose_reason: None,
        }
    }

    /// Plain, unclassified error.
    pub fn plain(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unclassified, message)
    }

    /// Intentional drop.
    pub fn drop(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Drop, message)
    }

    /// Retryable error.
    pub fn retry(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Retry, message)
    }

    /// Drop now, retry later.
    pub fn drop_retry(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DropRetry, message)
    }

    /// Never retried.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }

    /// The error a caller observes after a sandbox teardown.
    pub fn sandbox_disposed(reason: DisposeReason, message: impl Into<String>) -> Self {
        Self {
            name: SANDBOX_DISPOSED_ERROR.to_owned(),
            dispose_reason: Some(reason),
            ..Self::plain(message)
        }
    }

    /// Classification derived from [`name`](Self::name).
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::from_wire_name(&self.name)
    }

    /// `true` when the error came from a sandbox teardown.
    #[must_use]
    pub fn is_sandbox_disposed(&self) -> bool {
        self.dispose_reason.is_some()
    }

    /// Attach the partially transformed event.
    pub fn with_event(mut self, event: serde_json::Value) -> Self {
        self.event = Some(event);
        self
    }

    /// Attach a retry policy.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Record which function raised the error.
    pub fn with_function_id(mut self, function_id: impl Into<String>) -> Self {
        self.function_id = Some(function_id.into());
        self
    }

    /// Attach a stack trace.
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Promote an unclassified error to a [`RetryError`](ErrorKind::Retry)
    /// carrying `policy`. Other kinds are returned unchanged.
    pub fn promote_with_policy(mut self, policy: &RetryPolicy) -> Self {
        if self.kind() == ErrorKind::Unclassified {
            self.name = RETRY_ERROR.to_owned();
            if self.retry_policy.is_none() {
                self.retry_policy = Some(policy.clone());
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case("DropError", ErrorKind::Drop)]
    #[case("RetryError", ErrorKind::Retry)]
    #[case("Retry Error", ErrorKind::Retry)]
    #[case("Drop & RetryError", ErrorKind::DropRetry)]
    #[case("SandboxDisposedError", ErrorKind::DropRetry)]
    #[case("FatalError", ErrorKind::Fatal)]
    #[case("Error", ErrorKind::Unclassified)]
    #[case("TypeError", ErrorKind::Unclassified)]
    fn wire_names_classify(#[case] name: &str, #[case] kind: ErrorKind) {
        assert_eq!(ErrorKind::from_wire_name(name), kind);
    }

    #[test]
    fn guest_json_deserializes() {
        let err: FunctionError = serde_json::from_value(serde_json::json!({
            "name": "RetryError",
            "message": "upstream 503",
            "event": {"type": "track"},
            "retryPolicy": {"max": 3}
        }))
        .unwrap();
        assert_eq!(err.kind(), ErrorKind::Retry);
        assert_eq!(err.event, Some(serde_json::json!({"type": "track"})));
        assert_eq!(err.retry_policy.unwrap().max, 3);
    }

    #[test]
    fn missing_name_is_plain_error() {
        let err: FunctionError =
            serde_json::from_value(serde_json::json!({"message": "boom"})).unwrap();
        assert_eq!(err.name, "Error");
        assert_eq!(err.kind(), ErrorKind::Unclassified);
    }

    #[test]
    fn sandbox_disposed_is_drop_retry() {
        let err = FunctionError::sandbox_disposed(DisposeReason::Timeout, "took too long");
        assert_eq!(err.kind(), ErrorKind::DropRetry);
        assert!(err.kind().is_retry());
        assert!(err.kind().drops_event());
        assert!(err.is_sandbox_disposed());
    }

    #[test]
    fn promote_only_touches_unclassified() {
        let policy = RetryPolicy::with_max(3);
        let promoted = FunctionError::plain("boom").promote_with_policy(&policy);
        assert_eq!(promoted.kind(), ErrorKind::Retry);
        assert_eq!(promoted.retry_policy, Some(policy.clone()));

        let dropped = FunctionError::drop("skip").promote_with_policy(&policy);
        assert_eq!(dropped.kind(), ErrorKind::Drop);
        assert!(dropped.retry_policy.is_none());
    }

    #[test]
    fn display_includes_name_and_message() {
        assert_eq!(FunctionError::plain("boom").to_string(), "Error: boom");
    }
}
