#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Rotor Core
//!
//! Core types shared by every Rotor crate.
//!
//! ## Key Components
//!
//! - **Events**: [`Event`] plus the drop-sentinel rules ([`is_drop_result`])
//! - **Error taxonomy**: [`FunctionError`] and [`ErrorKind`], what user code
//!   can throw and how the pipeline treats it
//! - **Retry policy**: [`RetryPolicy`], the back-off schedule attached to errors
//! - **Execution log**: [`ExecutionLogEntry`], one entry per (function, event)
//! - **Profiles**: [`Profile`] and [`UserState`] for the stream-fold pipeline
//! - **Transport**: [`InboundMessage`] as delivered by the message bus
//!
//! ## Usage
//!
//! ```rust
//! use rotor_core::{ErrorKind, FunctionError, RetryPolicy, is_drop_result};
//!
//! let err = FunctionError::retry("upstream unavailable")
//!     .with_retry_policy(RetryPolicy::with_max(3));
//! assert_eq!(err.kind(), ErrorKind::Retry);
//! assert!(is_drop_result(&serde_json::json!("drop")));
//! ```

pub mod error;
pub mod event;
pub mod log;
pub mod message;
pub mod meta;
pub mod profile;
pub mod retry_policy;

pub use error::{DisposeReason, ErrorKind, FunctionError};
pub use event::{DROP_SENTINEL, Event, event_type, is_drop_result, message_id};
pub use log::{ExecutionLog, ExecutionLogEntry, MetricsMeta};
pub use message::{IngestType, InboundMessage};
pub use meta::FunctionMeta;
pub use profile::{Profile, UserState};
pub use retry_policy::RetryPolicy;

/// Serde helper for `f64` millisecond durations rounded to microseconds.
pub(crate) mod serde_millis {
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize a millisecond float rounded to three decimals.
    pub fn serialize<S: Serializer>(ms: &f64, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64((ms * 1000.0).round() / 1000.0)
    }

    /// Deserialize a millisecond float.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        f64::deserialize(d)
    }
}
