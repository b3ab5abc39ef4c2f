//! Execution log: one entry per (function, event) pairing.

use serde::{Deserialize, Serialize};

use crate::error::FunctionError;

/// Caller-supplied metadata echoed into every log entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsMeta {
    /// Workspace the run belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    /// Connection that delivered the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    /// Message id of the inbound event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Retry attempt this run belongs to (0 for the first delivery).
    #[serde(default)]
    pub retries: u32,
}

/// Outcome of running one function against one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionLogEntry {
    /// Function that ran.
    pub function_id: String,
    /// Index of the event within the stage's input set.
    pub event_index: usize,
    /// Input event, kept only when the function failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<serde_json::Value>,
    /// Error thrown by the function.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FunctionError>,
    /// The event left the pipeline at this stage.
    #[serde(default)]
    pub dropped: bool,
    /// Wall-clock time spent in the function.
    #[serde(with = "crate::serde_millis")]
    pub duration_ms: f64,
    /// Caller metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_meta: Option<MetricsMeta>,
}

impl ExecutionLogEntry {
    /// A successful entry.
    pub fn ok(function_id: impl Into<String>, event_index: usize, duration_ms: f64) -> Self {
        Self {
            function_id: function_id.into(),
            event_index,
            event: None,
            error: None,
            dropped: false,
            duration_ms,
            metrics_meta: None,
        }
    }

    /// An entry recording a thrown error and the input that caused it.
    pub fn failed(
        function_id: impl Into<String>,
        event_index: usize,
        event: serde_json::Value,
        error: FunctionError,
        duration_ms: f64,
    ) -> Self {
        let dropped = error.kind().drops_event();
        Self {
            function_id: function_id.into(),
            event_index,
            event: Some(event),
            error: Some(error),
            dropped,
            duration_ms,
            metrics_meta: None,
        }
    }

    /// Mark the event as dropped.
    pub fn with_dropped(mut self, dropped: bool) -> Self {
        self.dropped = dropped;
        self
    }

    /// Attach caller metadata.
    pub fn with_metrics_meta(mut self, meta: Option<MetricsMeta>) -> Self {
        self.metrics_meta = meta;
        self
    }

    /// Whether the function failed for this event.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Ordered entries for one input event.
pub type ExecutionLog = Vec<ExecutionLogEntry>;
