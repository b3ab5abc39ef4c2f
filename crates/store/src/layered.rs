//! Ordered store layers with unioned lookup.

use std::sync::Arc;

use async_trait::async_trait;
use rotor_ports::{PortsError, Ttl, TtlStatus, TtlStore};

/// Reads fall through the layers in order; writes go to the first layer;
/// deletes hit every layer.
///
/// Typical use: a per-run [`MemoryStore`](crate::MemoryStore) in front of
/// the durable workspace store.
#[derive(Clone)]
pub struct LayeredStore {
    layers: Vec<Arc<dyn TtlStore>>,
}

impl LayeredStore {
    /// Build from layers, highest precedence first.
    ///
    /// # Errors
    ///
    /// [`PortsError::InvalidArgument`] when `layers` is empty.
    pub fn new(layers: Vec<Arc<dyn TtlStore>>) -> Result<Self, PortsError> {
        if layers.is_empty() {
            return Err(PortsError::InvalidArgument(
                "layered store needs at least one layer".to_owned(),
            ));
        }
        Ok(Self { layers })
    }

    /// Number of layers.
    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    fn primary(&self) -> &Arc<dyn TtlStore> {
        &self.layers[0]
    }
}

impl std::fmt::Debug for LayeredStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayeredStore")
            .field("depth", &self.layers.len())
            .finish()
    }
}

#[async_trait]
impl TtlStore for LayeredStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, PortsError> {
        for layer in &self.layers {
            if let Some(v) = layer.get(key).await? {
                return Ok(Some(v));
            }
        }
        Ok(None)
    }

    async fn get_with_ttl(
        &self,
        key: &str,
    ) -> Result<Option<(serde_json::Value, TtlStatus)>, PortsError> {
        for layer in &self.layers {
            if let Some(hit) = layer.get_with_ttl(key).await? {
                return Ok(Some(hit));
            }
        }
        Ok(None)
    }

    async fn set(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Option<Ttl>,
    ) -> Result<(), PortsError> {
        self.primary().set(key, value, ttl).await
    }

    async fn del(&self, key: &str) -> Result<(), PortsError> {
        for layer in &self.layers {
            layer.del(key).await?;
        }
        Ok(())
    }
}
