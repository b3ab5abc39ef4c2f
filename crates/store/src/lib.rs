#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Rotor Store
//!
//! [`TtlStore`](rotor_ports::TtlStore) implementations.
//!
//! - [`MemoryStore`] -- ephemeral, lazily expiring; used by tests and test runs
//! - [`LayeredStore`] -- ordered layers with unioned lookup
//! - [`NamespacedStore`] -- per-workspace key prefixing
//! - `RedisStore` -- durable backend (feature `redis`)
//!
//! ```rust
//! use rotor_ports::{Ttl, TtlStore};
//! use rotor_store::MemoryStore;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), rotor_ports::PortsError> {
//! let store = MemoryStore::new();
//! store.set("k", serde_json::json!(1), Some("10s".parse::<Ttl>()?)).await?;
//! assert_eq!(store.get("k").await?, Some(serde_json::json!(1)));
//! # Ok(())
//! # }
//! ```

mod layered;
mod memory;
mod namespaced;
#[cfg(feature = "redis")]
mod redis;

pub use layered::LayeredStore;
pub use memory::MemoryStore;
pub use namespaced::NamespacedStore;
#[cfg(feature = "redis")]
pub use redis::RedisStore;
