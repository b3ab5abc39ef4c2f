//! Failure classification.

use rotor_core::{ErrorKind, FunctionError, RetryPolicy};
use serde_json::Value;

/// What to do with an event whose run failed.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDisposition {
    /// Discard. No retry, no dead letter.
    Drop,
    /// Requeue with back-off.
    Retry {
        /// Back-off schedule.
        policy: RetryPolicy,
        /// Function that failed.
        function_id: Option<String>,
        /// Partially transformed event to resume from.
        event: Option<Value>,
    },
    /// No automatic handling.
    Fatal,
}

impl RetryDisposition {
    /// Whether the event will be attempted again.
    pub const fn is_retry(&self) -> bool {
        matches!(self, Self::Retry { .. })
    }
}

/// Classify `error`. Retryable errors without a policy get
/// [`RetryPolicy::default`].
///
/// Unclassified errors retry; compile failures arrive as `FatalError` and
/// never do.
pub fn classify(error: &FunctionError) -> RetryDisposition {
    classify_with(error, &RetryPolicy::default())
}

/// [`classify`] with a custom fallback policy.
pub fn classify_with(error: &FunctionError, default_policy: &RetryPolicy) -> RetryDisposition {
    match error.kind() {
        ErrorKind::Drop => RetryDisposition::Drop,
        ErrorKind::Fatal => RetryDisposition::Fatal,
        ErrorKind::Retry | ErrorKind::DropRetry | ErrorKind::Unclassified => {
            RetryDisposition::Retry {
                policy: error
                    .retry_policy
                    .clone()
                    .unwrap_or_else(|| default_policy.clone()),
                function_id: error.function_id.clone(),
                event: error.event.clone(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rotor_core::DisposeReason;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(FunctionError::drop("skip"), false)]
    #[case(FunctionError::fatal("bad import"), false)]
    #[case(FunctionError::retry("later"), true)]
    #[case(FunctionError::drop_retry("later"), true)]
    #[case(FunctionError::plain("boom"), true)]
    #[case(FunctionError::sandbox_disposed(DisposeReason::Timeout, "timed out"), true)]
    fn kinds(#[case] error: FunctionError, #[case] retries: bool) {
        assert_eq!(classify(&error).is_retry(), retries);
    }

    #[test]
    fn drop_and_fatal_are_distinct() {
        let default = RetryPolicy::default();
        assert_eq!(classify_with(&FunctionError::drop("x"), &default), RetryDisposition::Drop);
        assert_eq!(classify_with(&FunctionError::fatal("x"), &default), RetryDisposition::Fatal);
    }

    #[test]
    fn own_policy_wins_over_default() {
        let error = FunctionError::retry("later")
            .with_retry_policy(RetryPolicy::with_max(7))
            .with_function_id("f2")
            .with_event(json!({"step": 1}));

        let RetryDisposition::Retry {
            policy,
            function_id,
            event,
        } = classify_with(&error, &RetryPolicy::with_max(1))
        else {
            panic!("expected retry");
        };
        assert_eq!(policy.max, 7);
        assert_eq!(function_id.as_deref(), Some("f2"));
        assert_eq!(event, Some(json!({"step": 1})));
    }

    #[test]
    fn unclassified_takes_default_policy() {
        let RetryDisposition::Retry { policy, .. } =
            classify_with(&FunctionError::plain("boom"), &RetryPolicy::with_max(2))
        else {
            panic!("expected retry");
        };
        assert_eq!(policy.max, 2);
    }
}
