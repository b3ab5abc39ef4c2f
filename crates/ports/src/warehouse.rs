//! Warehouse query port.

use async_trait::async_trait;

use crate::error::PortsError;

/// Named query parameters.
pub type QueryParams = serde_json::Map<String, serde_json::Value>;

/// Runs read-only parameterised queries against an analytical database.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Run `sql` on `connection_id`. Parameters are referenced as `:name` or
    /// `@name`. Rows come back as JSON objects.
    async fn query(
        &self,
        connection_id: &str,
        sql: &str,
        params: &QueryParams,
    ) -> Result<Vec<serde_json::Value>, PortsError>;
}
