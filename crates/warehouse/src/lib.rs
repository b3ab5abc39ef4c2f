#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Rotor Warehouse
//!
//! Parameterised, read-only queries against analytical databases.
//!
//! - [`WarehouseGateway`] -- lazily connects per connection id and caches
//!   connections with a time-to-idle; implements
//!   [`QueryExecutor`](rotor_ports::QueryExecutor)
//! - [`rewrite_named_params`] -- `:name` / `@name` to ClickHouse `{name:Type}`
//! - [`ClickHouseConnection`] -- ClickHouse HTTP interface client
//! - [`StaticConnector`] -- connection ids resolved from configuration

mod clickhouse;
mod config;
mod connector;
mod error;
mod gateway;
mod params;

pub use clickhouse::ClickHouseConnection;
pub use config::{ClickHouseConfig, WarehouseConfig};
pub use connector::{StaticConnector, WarehouseConnection, WarehouseConnector};
pub use error::WarehouseError;
pub use gateway::WarehouseGateway;
pub use params::{BoundParam, RewrittenQuery, infer_type, rewrite_named_params};
