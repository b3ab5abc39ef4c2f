//! Redis-backed store.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use rotor_ports::{PortsError, TTL_MISSING, TTL_NO_EXPIRY, Ttl, TtlStatus, TtlStore};

/// Durable store. Values are stored as JSON text.
#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
}

fn backend(op: &str, err: redis::RedisError) -> PortsError {
    if err.is_connection_dropped() || err.is_io_error() || err.is_timeout() {
        PortsError::Connection(format!("redis {op}: {err}"))
    } else {
        PortsError::Backend(format!("redis {op}: {err}"))
    }
}

impl RedisStore {
    /// Connect to `url` (`redis://host:port/db`).
    #[tracing::instrument(level = "debug")]
    pub async fn connect(url: &str) -> Result<Self, PortsError> {
        let client = redis::Client::open(url).map_err(|e| backend("open", e))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| backend("connect", e))?;
        Ok(Self { manager })
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl TtlStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, PortsError> {
        let mut conn = self.manager.clone();
        let raw: Option<String> = conn.get(key).await.map_err(|e| backend("get", e))?;
        raw.map(|s| serde_json::from_str(&s).map_err(PortsError::from))
            .transpose()
    }

    async fn get_with_ttl(
        &self,
        key: &str,
    ) -> Result<Option<(serde_json::Value, TtlStatus)>, PortsError> {
        let Some(value) = self.get(key).await? else {
            return Ok(None);
        };
        let status = match self.ttl(key).await? {
            TTL_MISSING => return Ok(None),
            TTL_NO_EXPIRY => TtlStatus::NoExpiry,
            secs => TtlStatus::Remaining(Duration::from_secs(secs.max(0) as u64)),
        };
        Ok(Some((value, status)))
    }

    async fn set(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Option<Ttl>,
    ) -> Result<(), PortsError> {
        let mut conn = self.manager.clone();
        let text = serde_json::to_string(&value)?;
        match ttl.and_then(Ttl::duration) {
            Some(d) => {
                let secs = d.as_secs().max(1);
                let _: () = conn
                    .set_ex(key, text, secs)
                    .await
                    .map_err(|e| backend("set_ex", e))?;
            }
            None => {
                let _: () = conn.set(key, text).await.map_err(|e| backend("set", e))?;
            }
        }
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), PortsError> {
        let mut conn = self.manager.clone();
        let _: i64 = conn.del(key).await.map_err(|e| backend("del", e))?;
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<i64, PortsError> {
        let mut conn = self.manager.clone();
        conn.ttl(key).await.map_err(|e| backend("ttl", e))
    }
}
