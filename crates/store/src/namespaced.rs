//! Key prefixing.

use std::sync::Arc;

use async_trait::async_trait;
use rotor_ports::{PortsError, Ttl, TtlStatus, TtlStore};

/// Prefixes every key with `"{namespace}:"` so workspaces sharing one
/// backend cannot see each other's keys.
#[derive(Clone)]
pub struct NamespacedStore {
    namespace: String,
    inner: Arc<dyn TtlStore>,
}

impl NamespacedStore {
    /// Wrap `inner` under `namespace`.
    pub fn new(namespace: impl Into<String>, inner: Arc<dyn TtlStore>) -> Self {
        Self {
            namespace: namespace.into(),
            inner,
        }
    }

    /// Namespace in use.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{key}", self.namespace)
    }
}

impl std::fmt::Debug for NamespacedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamespacedStore")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TtlStore for NamespacedStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, PortsError> {
        self.inner.get(&self.key(key)).await
    }

    async fn get_with_ttl(
        &self,
        key: &str,
    ) -> Result<Option<(serde_json::Value, TtlStatus)>, PortsError> {
        self.inner.get_with_ttl(&self.key(key)).await
    }

    async fn set(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Option<Ttl>,
    ) -> Result<(), PortsError> {
        self.inner.set(&self.key(key), value, ttl).await
    }

    async fn del(&self, key: &str) -> Result<(), PortsError> {
        self.inner.del(&self.key(key)).await
    }

    async fn ttl(&self, key: &str) -> Result<i64, PortsError> {
        self.inner.ttl(&self.key(key)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test]
    async fn namespaces_are_isolated() {
        let backend = Arc::new(MemoryStore::new());
        let ws1 = NamespacedStore::new("ws1", backend.clone());
        let ws2 = NamespacedStore::new("ws2", backend.clone());

        ws1.set("k", json!(1), None).await.unwrap();
        assert_eq!(ws1.get("k").await.unwrap(), Some(json!(1)));
        assert_eq!(ws2.get("k").await.unwrap(), None);
        assert_eq!(backend.get("ws1:k").await.unwrap(), Some(json!(1)));
    }
}
