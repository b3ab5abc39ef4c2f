//! Gateway configuration.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// ClickHouse HTTP endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClickHouseConfig {
    /// Base URL, e.g. `http://localhost:8123`.
    pub url: String,
    /// Database used when the query does not qualify tables.
    pub database: Option<String>,
    /// User name.
    pub user: Option<String>,
    /// Password.
    pub password: Option<String>,
    /// Per-request timeout.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8123".to_owned(),
            database: None,
            user: None,
            password: None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Gateway configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    /// Drop a cached connection after it has been idle this long.
    #[serde(with = "humantime_serde")]
    pub idle_ttl: Duration,
    /// Upper bound of cached connections.
    pub max_connections: u64,
    /// Known connections by id.
    pub connections: BTreeMap<String, ClickHouseConfig>,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            idle_ttl: Duration::from_secs(600),
            max_connections: 1_000,
            connections: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn humantime_durations() {
        let cfg: WarehouseConfig = serde_json::from_value(serde_json::json!({
            "idle_ttl": "5m",
            "connections": {"wh": {"url": "http://ch:8123", "timeout": "2s"}}
        }))
        .unwrap();
        assert_eq!(cfg.idle_ttl, Duration::from_secs(300));
        assert_eq!(cfg.connections["wh"].timeout, Duration::from_secs(2));
        assert_eq!(cfg.max_connections, 1_000);
    }
}
