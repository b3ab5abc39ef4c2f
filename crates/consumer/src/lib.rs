#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Rotor Consumer
//!
//! Priority consumption for the profile-rebuild workload.
//!
//! - [`PriorityConsumer`]: N [`MessageQueue`](rotor_ports::MessageQueue)
//!   classes drained by one bounded pool; lower classes are throttled as the
//!   pool fills (see [`admission_threshold`])
//! - [`Coalescer`]: at most one immediate and one deferred run per key per
//!   window
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use rotor_consumer::{ConsumerConfig, ConsumerError, MessageHandler, PriorityConsumer};
//! use rotor_ports::MessageQueue;
//! use serde_json::Value;
//!
//! struct Rebuild;
//!
//! #[async_trait]
//! impl MessageHandler for Rebuild {
//!     async fn handle(&self, rank: usize, id: &str, payload: Value) -> Result<(), ConsumerError> {
//!         println!("class {rank}: {id} {payload}");
//!         Ok(())
//!     }
//! }
//!
//! # async fn example(high: Arc<dyn MessageQueue>, low: Arc<dyn MessageQueue>) -> Result<(), ConsumerError> {
//! let consumer = PriorityConsumer::new(vec![high, low], Arc::new(Rebuild), ConsumerConfig::default())?;
//! consumer.start();
//! // ...
//! consumer.close().await;
//! # Ok(())
//! # }
//! ```

mod coalesce;
mod config;
mod consumer;
mod error;

pub use coalesce::{Coalescer, Scheduled};
pub use config::ConsumerConfig;
pub use consumer::{MessageHandler, PriorityConsumer, admission_threshold};
pub use error::ConsumerError;
