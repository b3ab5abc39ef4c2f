//! In-memory TTL store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use dashmap::DashMap;
use rotor_ports::{PortsError, Ttl, TtlStatus, TtlStore};
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Entry {
    value: serde_json::Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }

    fn status(&self, now: Instant) -> TtlStatus {
        self.expires_at
            .map_or(TtlStatus::NoExpiry, |at| {
                TtlStatus::Remaining(at.saturating_duration_since(now))
            })
    }
}

/// Ephemeral store. Expired entries are removed when read.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
}

impl MemoryStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with non-expiring entries.
    pub fn with_entries(entries: impl IntoIterator<Item = (String, serde_json::Value)>) -> Self {
        let store = Self::new();
        for (key, value) in entries {
            store.entries.insert(
                key,
                Entry {
                    value,
                    expires_at: None,
                },
            );
        }
        store
    }

    /// Snapshot of all live entries.
    pub fn dump(&self) -> BTreeMap<String, serde_json::Value> {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|e| e.value().is_live(now))
            .map(|e| (e.key().clone(), e.value().value.clone()))
            .collect()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| e.value().is_live(now)).count()
    }

    /// Whether there are no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live(&self, key: &str) -> Option<Entry> {
        let now = Instant::now();
        let entry = self.entries.get(key)?.value().clone();
        if entry.is_live(now) {
            Some(entry)
        } else {
            self.entries.remove_if(key, |_, e| !e.is_live(now));
            None
        }
    }
}

#[async_trait]
impl TtlStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, PortsError> {
        Ok(self.live(key).map(|e| e.value))
    }

    async fn get_with_ttl(
        &self,
        key: &str,
    ) -> Result<Option<(serde_json::Value, TtlStatus)>, PortsError> {
        let now = Instant::now();
        Ok(self.live(key).map(|e| {
            let status = e.status(now);
            (e.value, status)
        }))
    }

    async fn set(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Option<Ttl>,
    ) -> Result<(), PortsError> {
        let expires_at = ttl.and_then(Ttl::duration).map(|d| Instant::now() + d);
        self.entries
            .insert(key.to_owned(), Entry { value, expires_at });
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), PortsError> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rotor_ports::{TTL_MISSING, TTL_NO_EXPIRY};
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn set_get_del() {
        let store = MemoryStore::new();
        store.set("a", json!({"n": 1}), None).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(json!({"n": 1})));
        store.del("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
        store.del("a").await.unwrap();
    }

    #[tokio::test]
    async fn ttl_codes() {
        let store = MemoryStore::new();
        store.set("forever", json!(1), None).await.unwrap();
        store
            .set("inf", json!(1), Some(Ttl::Infinite))
            .await
            .unwrap();
        assert_eq!(store.ttl("forever").await.unwrap(), TTL_NO_EXPIRY);
        assert_eq!(store.ttl("inf").await.unwrap(), TTL_NO_EXPIRY);
        assert_eq!(store.ttl("missing").await.unwrap(), TTL_MISSING);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_lazily() {
        let store = MemoryStore::new();
        store
            .set("k", json!("v"), Some(Ttl::After(Duration::from_secs(10))))
            .await
            .unwrap();
        assert_eq!(store.ttl("k").await.unwrap(), 10);

        tokio::time::advance(Duration::from_secs(4)).await;
        let (value, status) = store.get_with_ttl("k").await.unwrap().unwrap();
        assert_eq!(value, json!("v"));
        assert_eq!(status.as_seconds(), 6);

        tokio::time::advance(Duration::from_secs(7)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.ttl("k").await.unwrap(), TTL_MISSING);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn dump_skips_expired() {
        let store = MemoryStore::with_entries([("seed".to_owned(), json!(true))]);
        store
            .set("short", json!(1), Some(Ttl::After(Duration::from_secs(1))))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;

        let dump = store.dump();
        assert_eq!(dump.len(), 1);
        assert_eq!(dump["seed"], json!(true));
    }
}
