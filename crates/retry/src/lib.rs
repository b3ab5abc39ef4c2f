//! # Rotor Retry
//!
//! Failure classification and routing.
//!
//! A chain run that ends in a retryable error ([`rotor_chain::check_error`])
//! becomes a [`Failure`]. [`classify`] decides whether it is dropped, retried
//! or fatal; [`RetryRouter`] turns that into a [`Route`] (requeue with a
//! back-off, or dead letter once the policy is exhausted) and publishes it.
//!
//! Retries replay only the stages that still need to run; see
//! [`ReplayScope`].
//!
//! ```rust
//! use rotor_core::{FunctionError, InboundMessage, RetryPolicy};
//! use rotor_retry::{Failure, Route, RetryRouter};
//!
//! let error = FunctionError::retry("upstream 503").with_retry_policy(RetryPolicy::with_max(3));
//! let message = InboundMessage::new("conn-1", serde_json::json!({"messageId": "m1"}));
//! let failure = Failure::new(error, message, "rotor.events");
//!
//! let router = RetryRouter::default();
//! assert!(matches!(router.route(&failure, 1), Route::Requeue { .. }));
//! assert!(matches!(router.route(&failure, 4), Route::DeadLetter { .. }));
//! ```

#![warn(missing_docs)]

pub mod classify;
pub mod error;
pub mod router;

pub use classify::{RetryDisposition, classify, classify_with};
pub use error::RetryError;
pub use rotor_chain::ReplayScope;
pub use router::{Failure, RetryConfig, RetryHeaders, RetryRouter, Route};
