//! Analytics event helpers and the drop-sentinel rules.

/// An analytics event. Normally a JSON object.
pub type Event = serde_json::Value;

/// String result that removes an event from the pipeline.
pub const DROP_SENTINEL: &str = "drop";

/// Whether a function result removes the event from the pipeline.
///
/// `"drop"`, `[]`, `null` and `false` are equivalent drop sentinels. Dropping
/// is not an error.
#[must_use]
pub fn is_drop_result(result: &serde_json::Value) -> bool {
    match result {
        serde_json::Value::Null | serde_json::Value::Bool(false) => true,
        serde_json::Value::String(s) => s == DROP_SENTINEL,
        serde_json::Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// The event's `type` field (`track`, `identify`, …).
#[must_use]
pub fn event_type(event: &Event) -> Option<&str> {
    event.get("type").and_then(serde_json::Value::as_str)
}

/// The event's `messageId`.
#[must_use]
pub fn message_id(event: &Event) -> Option<&str> {
    event.get("messageId").and_then(serde_json::Value::as_str)
}
