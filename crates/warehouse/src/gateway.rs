//! Connection-caching query gateway.

use std::sync::Arc;

use async_trait::async_trait;
use moka::future::Cache;
use rotor_ports::{PortsError, QueryExecutor, QueryParams};

use crate::config::WarehouseConfig;
use crate::connector::{StaticConnector, WarehouseConnection, WarehouseConnector};
use crate::error::WarehouseError;
use crate::params::rewrite_named_params;

/// Runs queries through lazily opened, idle-expiring connections.
///
/// Concurrent first calls for the same connection id share one
/// initialisation.
#[derive(Clone)]
pub struct WarehouseGateway {
    connector: Arc<dyn WarehouseConnector>,
    connections: Cache<String, Arc<dyn WarehouseConnection>>,
}

impl WarehouseGateway {
    /// Gateway over `connector`.
    pub fn new(connector: Arc<dyn WarehouseConnector>, config: &WarehouseConfig) -> Self {
        let connections = Cache::builder()
            .max_capacity(config.max_connections)
            .time_to_idle(config.idle_ttl)
            .build();
        Self {
            connector,
            connections,
        }
    }

    /// Gateway over the connections listed in `config`.
    pub fn from_config(config: &WarehouseConfig) -> Self {
        Self::new(
            Arc::new(StaticConnector::new(config.connections.clone())),
            config,
        )
    }

    async fn connection(
        &self,
        connection_id: &str,
    ) -> Result<Arc<dyn WarehouseConnection>, WarehouseError> {
        let connector = Arc::clone(&self.connector);
        let id = connection_id.to_owned();
        self.connections
            .try_get_with(id.clone(), async move { connector.connect(&id).await })
            .await
            .map_err(|e| (*e).clone())
    }

    /// Run `sql` with named parameters on `connection_id`.
    #[tracing::instrument(level = "debug", skip(self, sql, params), fields(params = params.len()))]
    pub async fn query(
        &self,
        connection_id: &str,
        sql: &str,
        params: &QueryParams,
    ) -> Result<Vec<serde_json::Value>, WarehouseError> {
        let rewritten = rewrite_named_params(sql, params)?;
        let connection = self.connection(connection_id).await?;
        let rows = connection.execute(&rewritten).await?;
        tracing::debug!(rows = rows.len(), "warehouse query done");
        Ok(rows)
    }

    /// Forget a cached connection.
    pub async fn invalidate(&self, connection_id: &str) {
        self.connections.invalidate(connection_id).await;
    }

    /// Number of cached connections.
    pub async fn cached_connections(&self) -> u64 {
        self.connections.run_pending_tasks().await;
        self.connections.entry_count()
    }
}

impl std::fmt::Debug for WarehouseGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WarehouseGateway").finish_non_exhaustive()
    }
}

#[async_trait]
impl QueryExecutor for WarehouseGateway {
    async fn query(
        &self,
        connection_id: &str,
        sql: &str,
        params: &QueryParams,
    ) -> Result<Vec<serde_json::Value>, PortsError> {
        Ok(Self::query(self, connection_id, sql, params).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::RewrittenQuery;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo;

    #[async_trait]
    impl WarehouseConnection for Echo {
        async fn execute(
            &self,
            query: &RewrittenQuery,
        ) -> Result<Vec<serde_json::Value>, WarehouseError> {
            Ok(vec![serde_json::json!({"sql": query.sql})])
        }
    }

    #[derive(Default)]
    struct Counting {
        opened: AtomicUsize,
    }

    #[async_trait]
    impl WarehouseConnector for Counting {
        async fn connect(
            &self,
            connection_id: &str,
        ) -> Result<Arc<dyn WarehouseConnection>, WarehouseError> {
            if connection_id == "missing" {
                return Err(WarehouseError::UnknownConnection(connection_id.into()));
            }
            self.opened.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            Ok(Arc::new(Echo))
        }
    }

    #[tokio::test]
    async fn concurrent_first_calls_share_one_connection() {
        let connector = Arc::new(Counting::default());
        let gateway = WarehouseGateway::new(connector.clone(), &WarehouseConfig::default());
        let params = QueryParams::new();

        let calls = (0..8).map(|_| gateway.query("wh", "SELECT 1", &params));
        let results = futures::future::join_all(calls).await;
        assert!(results.iter().all(Result::is_ok));
        assert_eq!(connector.opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_connection_is_not_cached() {
        let connector = Arc::new(Counting::default());
        let gateway = WarehouseGateway::new(connector, &WarehouseConfig::default());
        let err = gateway
            .query("missing", "SELECT 1", &QueryParams::new())
            .await
            .unwrap_err();
        assert!(matches!(err, WarehouseError::UnknownConnection(_)));
        assert_eq!(gateway.cached_connections().await, 0);
    }

    #[tokio::test]
    async fn rewrites_before_executing() {
        let gateway = WarehouseGateway::new(
            Arc::new(Counting::default()),
            &WarehouseConfig::default(),
        );
        let params = serde_json::json!({"id": 5}).as_object().cloned().unwrap();
        let rows = gateway
            .query("wh", "SELECT :id", &params)
            .await
            .unwrap();
        assert_eq!(rows, vec![serde_json::json!({"sql": "SELECT {id:Int64}"})]);
    }
}
