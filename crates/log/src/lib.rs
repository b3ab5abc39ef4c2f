#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Rotor Log
//!
//! Subscriber initialisation shared by Rotor binaries and tests.
//!
//! ```rust,no_run
//! use rotor_log::{Format, LogConfig};
//!
//! let _guard = rotor_log::init(&LogConfig {
//!     level: "info,rotor_sandbox=debug".into(),
//!     format: Format::Json,
//!     ..LogConfig::default()
//! })
//! .expect("logger");
//! tracing::info!(entity_id = "e1", "chain built");
//! ```

mod builder;
mod config;
mod error;

pub use builder::{LoggerGuard, init};
pub use config::{Format, LogConfig};
pub use error::{LogError, LogResult};
