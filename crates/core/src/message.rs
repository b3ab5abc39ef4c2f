//! Inbound transport message.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How an event entered the system.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestType {
    /// Browser SDK.
    #[default]
    Browser,
    /// Server-to-server API.
    S2s,
}

/// A message as delivered by the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    /// Connection (source → destination link) the message is routed through.
    pub connection_id: String,
    /// Unique message id.
    pub message_id: String,
    /// The analytics event.
    pub http_payload: serde_json::Value,
    /// Request headers captured at ingest.
    #[serde(default)]
    pub http_headers: BTreeMap<String, String>,
    /// Ingest path.
    #[serde(default)]
    pub ingest_type: IngestType,
    /// Origin metadata, opaque to the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<serde_json::Value>,
    /// Ingest time.
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    /// Wrap an event for `connection_id`, taking the message id from the
    /// event when it has one.
    pub fn new(connection_id: impl Into<String>, event: serde_json::Value) -> Self {
        let message_id = crate::event::message_id(&event)
            .map_or_else(|| format!("m-{}", Utc::now().timestamp_micros()), str::to_owned);
        Self {
            connection_id: connection_id.into(),
            message_id,
            http_payload: event,
            http_headers: BTreeMap::new(),
            ingest_type: IngestType::default(),
            origin: None,
            received_at: Utc::now(),
        }
    }
}
