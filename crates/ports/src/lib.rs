#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Rotor Ports
//!
//! Interface traits (ports) between the Rotor engine and its collaborators.
//!
//! - [`TtlStore`] -- key-value store with per-key expiry
//! - [`Fetcher`] -- outbound HTTP for the `fetch` binding
//! - [`QueryExecutor`] -- read-only warehouse queries
//! - [`MessageQueue`] / [`MessagePublisher`] -- transport
//! - [`EventsProvider`] / [`UserProvider`] -- stream-fold inputs
//! - [`FunctionLogger`] -- sink for function log calls
//!
//! All async traits are `async_trait` and object-safe, suitable for use as
//! `Arc<dyn Trait>` behind dependency injection.

pub mod error;
pub mod fetch;
pub mod logger;
pub mod provider;
pub mod queue;
pub mod store;
pub mod warehouse;

pub use error::PortsError;
pub use fetch::{FetchRequest, FetchResponse, Fetcher};
pub use logger::{FunctionLogger, LogLevel, LogRecord, TracingLogger};
pub use provider::{EventsProvider, UserProvider, VecEventsProvider};
pub use queue::{MessagePublisher, MessageQueue, OutboundMessage};
pub use store::{TTL_MISSING, TTL_NO_EXPIRY, Ttl, TtlStatus, TtlStore};
pub use warehouse::{QueryExecutor, QueryParams};
