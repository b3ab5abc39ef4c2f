//! ClickHouse HTTP interface client.

use async_trait::async_trait;

use crate::config::ClickHouseConfig;
use crate::connector::WarehouseConnection;
use crate::error::WarehouseError;
use crate::params::RewrittenQuery;

/// Speaks the ClickHouse HTTP interface: the SQL is the POST body, values
/// travel as `param_<name>` query arguments and rows come back as
/// `JSONEachRow`.
#[derive(Debug, Clone)]
pub struct ClickHouseConnection {
    client: reqwest::Client,
    config: ClickHouseConfig,
}

impl ClickHouseConnection {
    /// Connection with its own HTTP client.
    pub fn new(config: ClickHouseConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    /// Connection sharing `client`.
    pub fn with_client(client: reqwest::Client, config: ClickHouseConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl WarehouseConnection for ClickHouseConnection {
    async fn execute(
        &self,
        query: &RewrittenQuery,
    ) -> Result<Vec<serde_json::Value>, WarehouseError> {
        let mut args: Vec<(String, String)> =
            vec![("default_format".to_owned(), "JSONEachRow".to_owned())];
        if let Some(db) = &self.config.database {
            args.push(("database".to_owned(), db.clone()));
        }
        for p in &query.params {
            args.push((format!("param_{}", p.name), p.value.clone()));
        }

        let mut request = self
            .client
            .post(&self.config.url)
            .query(&args)
            .timeout(self.config.timeout)
            .body(query.sql.clone());
        if let Some(user) = &self.config.user {
            request = request.basic_auth(user, self.config.password.as_ref());
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(WarehouseError::Query {
                status: status.as_u16(),
                body: body.trim().to_owned(),
            });
        }

        body.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line).map_err(|e| WarehouseError::Decode(e.to_string()))
            })
            .collect()
    }
}
