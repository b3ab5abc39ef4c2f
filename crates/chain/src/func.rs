//! Chain stages.

use std::sync::Arc;

use async_trait::async_trait;
use rotor_core::{FunctionError, FunctionMeta};
use rotor_sandbox::HostBindings;
use serde::{Deserialize, Serialize};

/// Where a stage sits in the pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageRole {
    /// Plain transformation. A failure stops the event at this stage.
    #[default]
    Transformation,
    /// User-defined function stage. A failure forwards the event as it was
    /// when the stage failed.
    Udf,
    /// Terminal sink.
    Destination,
}

/// Identity of a function as seen by user code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionIdentity {
    /// Function id.
    pub id: String,
    /// Display name.
    pub name: String,
}

/// Per-function view handed to user code as the second argument.
///
/// Bound once at compile time so every call of a function sees the same
/// identity and props, independent of the other functions in the chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionContext {
    /// The function itself.
    pub function: FunctionIdentity,
    /// Configured variables.
    #[serde(default)]
    pub props: serde_json::Map<String, serde_json::Value>,
    /// Owning workspace.
    pub workspace_id: String,
    /// Connection the chain serves, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
}

impl FunctionContext {
    /// Serialised form with the per-run `context` attached.
    pub fn to_value(&self, run_context: &serde_json::Value) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let serde_json::Value::Object(map) = &mut value {
            map.insert("context".to_owned(), run_context.clone());
        }
        value
    }
}

/// Shared host bindings of one chain build.
#[derive(Debug, Clone)]
pub struct ChainContext {
    /// Bindings every stage in the chain shares.
    pub bindings: HostBindings,
}

/// A stage implemented in Rust rather than in a sandbox.
///
/// Native stages live in the same chain as user functions, typically as the
/// terminal destination. They may mutate `event` in place.
#[async_trait]
pub trait NativeFunction: Send + Sync {
    /// Handle one event. `Ok(None)` keeps the (possibly mutated) event.
    async fn call(
        &self,
        event: &mut serde_json::Value,
        function: &FunctionContext,
        chain: &ChainContext,
    ) -> Result<Option<serde_json::Value>, FunctionError>;
}

/// How a stage is executed.
#[derive(Clone)]
pub enum Executor {
    /// Inside the chain's sandbox.
    Sandboxed,
    /// In-process.
    Native(Arc<dyn NativeFunction>),
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sandboxed => f.write_str("Sandboxed"),
            Self::Native(_) => f.write_str("Native"),
        }
    }
}

/// One stage of a compiled chain.
#[derive(Debug, Clone)]
pub struct Func {
    /// Function id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Pipeline role.
    pub role: StageRole,
    /// Declared metadata.
    pub meta: Option<FunctionMeta>,
    /// Bound per-function context.
    pub context: FunctionContext,
    /// Executor.
    pub executor: Executor,
}

impl Func {
    /// Attach this function's identity, and its declared retry policy when
    /// the error is otherwise unclassified.
    pub(crate) fn annotate(&self, error: FunctionError) -> FunctionError {
        let error = match self.meta.as_ref().and_then(|m| m.retry_policy.as_ref()) {
            Some(policy) => error.promote_with_policy(policy),
            None => error,
        };
        error.with_function_id(&self.id)
    }
}

/// Terminal stage that records every event it receives.
#[derive(Debug, Default)]
pub struct Capture {
    events: parking_lot::Mutex<Vec<serde_json::Value>>,
}

impl Capture {
    /// Empty capture.
    pub fn new() -> Self {
        Self::default()
    }

    /// Events received so far.
    pub fn events(&self) -> Vec<serde_json::Value> {
        self.events.lock().clone()
    }

    /// Take the received events, leaving the capture empty.
    pub fn take(&self) -> Vec<serde_json::Value> {
        std::mem::take(&mut *self.events.lock())
    }
}

#[async_trait]
impl NativeFunction for Capture {
    async fn call(
        &self,
        event: &mut serde_json::Value,
        _function: &FunctionContext,
        _chain: &ChainContext,
    ) -> Result<Option<serde_json::Value>, FunctionError> {
        self.events.lock().push(event.clone());
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rotor_core::{ErrorKind, RetryPolicy};
    use serde_json::json;

    fn context() -> FunctionContext {
        FunctionContext {
            function: FunctionIdentity {
                id: "f1".into(),
                name: "Enrich".into(),
            },
            props: json!({"apiKey": "k"}).as_object().cloned().unwrap(),
            workspace_id: "w1".into(),
            connection_id: Some("c1".into()),
        }
    }

    #[test]
    fn context_value_shape() {
        let value = context().to_value(&json!({"retries": 0}));
        assert_eq!(
            value,
            json!({
                "function": {"id": "f1", "name": "Enrich"},
                "props": {"apiKey": "k"},
                "workspaceId": "w1",
                "connectionId": "c1",
                "context": {"retries": 0}
            })
        );
    }

    #[test]
    fn annotate_promotes_with_declared_policy() {
        let func = Func {
            id: "f1".into(),
            name: "f1".into(),
            role: StageRole::Udf,
            meta: Some(FunctionMeta {
                name: None,
                retry_policy: Some(RetryPolicy::with_max(3)),
            }),
            context: context(),
            executor: Executor::Sandboxed,
        };
        let err = func.annotate(FunctionError::plain("boom"));
        assert_eq!(err.kind(), ErrorKind::Retry);
        assert_eq!(err.function_id.as_deref(), Some("f1"));
        assert_eq!(err.retry_policy.map(|p| p.max), Some(3));

        let err = func.annotate(FunctionError::drop("skip"));
        assert_eq!(err.kind(), ErrorKind::Drop);
    }
}
