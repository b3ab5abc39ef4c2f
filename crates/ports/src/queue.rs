//! Message queue and publisher ports.
//!
//! [`MessageQueue`] is what consumers drain; [`MessagePublisher`] is what
//! the retry router writes to.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PortsError;

/// Work queue interface with at-least-once delivery.
///
/// - [`enqueue`](Self::enqueue) adds a message and returns its id
/// - [`dequeue`](Self::dequeue) retrieves the next message (waiting up to `timeout`)
/// - [`ack`](Self::ack) confirms successful processing
/// - [`nack`](Self::nack) requeues a message
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Enqueue a message. Returns its id.
    async fn enqueue(&self, payload: serde_json::Value) -> Result<String, PortsError>;

    /// Next message as `(id, payload)`, or `None` on timeout or close.
    async fn dequeue(
        &self,
        timeout: Duration,
    ) -> Result<Option<(String, serde_json::Value)>, PortsError>;

    /// Acknowledge successful processing.
    async fn ack(&self, id: &str) -> Result<(), PortsError>;

    /// Negative-acknowledge: requeue.
    async fn nack(&self, id: &str) -> Result<(), PortsError>;

    /// Number of queued (not in-flight) messages.
    async fn len(&self) -> Result<usize, PortsError>;

    /// Whether the queue is empty.
    async fn is_empty(&self) -> Result<bool, PortsError> {
        Ok(self.len().await? == 0)
    }
}

/// A message written to a topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Partition / dedup key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Transport headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Body.
    pub payload: serde_json::Value,
}

/// Publishes messages to named topics.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Publish `message` on `topic`.
    async fn publish(&self, topic: &str, message: OutboundMessage) -> Result<(), PortsError>;
}
