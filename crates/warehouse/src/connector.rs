//! Connection abstraction and the configuration-backed connector.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::clickhouse::ClickHouseConnection;
use crate::config::ClickHouseConfig;
use crate::error::WarehouseError;
use crate::params::RewrittenQuery;

/// An open connection to one warehouse.
#[async_trait]
pub trait WarehouseConnection: Send + Sync {
    /// Run an already rewritten query.
    async fn execute(&self, query: &RewrittenQuery)
    -> Result<Vec<serde_json::Value>, WarehouseError>;
}

/// Creates connections on first use.
#[async_trait]
pub trait WarehouseConnector: Send + Sync {
    /// Open a connection for `connection_id`.
    async fn connect(
        &self,
        connection_id: &str,
    ) -> Result<Arc<dyn WarehouseConnection>, WarehouseError>;
}

/// Resolves connection ids from a fixed table of ClickHouse endpoints.
#[derive(Debug, Clone)]
pub struct StaticConnector {
    connections: BTreeMap<String, ClickHouseConfig>,
    client: reqwest::Client,
}

impl StaticConnector {
    /// Connector over `connections`.
    pub fn new(connections: BTreeMap<String, ClickHouseConfig>) -> Self {
        Self {
            connections,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl WarehouseConnector for StaticConnector {
    async fn connect(
        &self,
        connection_id: &str,
    ) -> Result<Arc<dyn WarehouseConnection>, WarehouseError> {
        let config = self
            .connections
            .get(connection_id)
            .ok_or_else(|| WarehouseError::UnknownConnection(connection_id.to_owned()))?;
        tracing::debug!(connection_id, url = %config.url, "opening warehouse connection");
        Ok(Arc::new(ClickHouseConnection::with_client(
            self.client.clone(),
            config.clone(),
        )))
    }
}
