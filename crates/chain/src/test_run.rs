//! Debug entry point: run functions once against a throwaway environment.
//!
//! A test run gets its own [`MemoryStore`] seeded from the request, a log
//! sink that keeps every function log call and a fetcher that records each
//! outbound request. It never fails: errors come back as [`TestRunError`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;
use rotor_core::{ErrorKind, FunctionError, RetryPolicy, UserState};
use rotor_ports::{
    FetchRequest, FetchResponse, Fetcher, FunctionLogger, LogRecord, PortsError,
    VecEventsProvider,
};
use rotor_sandbox::{CompiledFunction, HostBindings, SandboxEngine, SandboxLimits};
use rotor_store::MemoryStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::compiler::{ChainCompiler, ChainDefinition, StageDefinition};
use crate::func::StageRole;
use crate::runner::{self, RunContext, RunOptions};

const TEST_RUN_ENTITY: &str = "test-run";

/// Inputs of a test run.
#[derive(Debug, Clone)]
pub struct TestRunRequest {
    /// Functions, in chain order.
    pub functions: Vec<CompiledFunction>,
    /// Event for a per-event run.
    pub event: Value,
    /// When set, run the stream fold over these events instead.
    pub events: Option<Vec<Value>>,
    /// Seed user state for a stream fold.
    pub user: UserState,
    /// Props handed to every function.
    pub variables: serde_json::Map<String, Value>,
    /// Initial store contents.
    pub store: BTreeMap<String, Value>,
    /// Workspace the functions run in.
    pub workspace_id: String,
    /// Limits for the throwaway sandbox.
    pub limits: SandboxLimits,
}

impl TestRunRequest {
    /// Per-event run of `functions` against `event`.
    pub fn new(functions: Vec<CompiledFunction>, event: Value) -> Self {
        Self {
            functions,
            event,
            events: None,
            user: UserState::default(),
            variables: serde_json::Map::new(),
            store: BTreeMap::new(),
            workspace_id: "test".to_owned(),
            limits: SandboxLimits::default(),
        }
    }
}

/// Error shape returned to the caller of a test run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRunError {
    /// Error name (`RetryError`, `Error`, ...).
    pub name: String,
    /// Message.
    pub message: String,
    /// Guest stack, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    /// Retry policy the error carries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
    /// Function that failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_id: Option<String>,
}

impl From<FunctionError> for TestRunError {
    fn from(error: FunctionError) -> Self {
        Self {
            name: error.name,
            message: error.message,
            stack: error.stack,
            retry_policy: error.retry_policy,
            function_id: error.function_id,
        }
    }
}

/// One outbound request made during a test run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchActivity {
    /// Method.
    pub method: String,
    /// Requested URL.
    pub url: String,
    /// Response status, when a response arrived.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Failure, when none did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Round-trip time.
    pub duration_ms: f64,
}

/// Outcome of a test run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRunResult {
    /// The single output event, an array when there are several, or the
    /// folded profile. `null` when dropped or failed.
    pub result: Value,
    /// Whether the event was dropped.
    pub dropped: bool,
    /// Store contents after the run.
    pub store: BTreeMap<String, Value>,
    /// Function log calls, in order.
    pub logs: Vec<LogRecord>,
    /// Outbound requests, in order.
    pub fetches: Vec<FetchActivity>,
    /// First failure, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TestRunError>,
}

/// Log sink keeping every record.
#[derive(Debug, Default)]
pub struct ActivityLog {
    records: Mutex<Vec<LogRecord>>,
}

impl ActivityLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records so far.
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }
}

impl FunctionLogger for ActivityLog {
    fn log(&self, record: LogRecord) {
        self.records.lock().push(record);
    }
}

/// Fetcher that remembers each request it forwards.
pub struct RecordingFetcher {
    inner: Arc<dyn Fetcher>,
    activity: Mutex<Vec<FetchActivity>>,
}

impl std::fmt::Debug for RecordingFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingFetcher")
            .field("requests", &self.activity.lock().len())
            .finish_non_exhaustive()
    }
}

impl RecordingFetcher {
    /// Wrap `inner`.
    pub fn new(inner: Arc<dyn Fetcher>) -> Self {
        Self {
            inner,
            activity: Mutex::new(Vec::new()),
        }
    }

    /// Requests so far.
    pub fn activity(&self) -> Vec<FetchActivity> {
        self.activity.lock().clone()
    }
}

#[async_trait]
impl Fetcher for RecordingFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, PortsError> {
        let method = request.method.clone();
        let url = request.url.clone();
        let started = Instant::now();
        let result = self.inner.fetch(request).await;
        let (status, error) = match &result {
            Ok(response) => (Some(response.status), None),
            Err(e) => (None, Some(e.to_string())),
        };
        self.activity.lock().push(FetchActivity {
            method,
            url,
            status,
            error,
            duration_ms: started.elapsed().as_secs_f64() * 1000.0,
        });
        result
    }
}

/// Run `request` once.
#[tracing::instrument(level = "debug", skip_all, fields(functions = request.functions.len()))]
pub async fn test_run(
    engine: &Arc<SandboxEngine>,
    fetcher: Arc<dyn Fetcher>,
    request: TestRunRequest,
) -> TestRunResult {
    let store = Arc::new(MemoryStore::with_entries(request.store.clone()));
    let logs = Arc::new(ActivityLog::new());
    let fetches = Arc::new(RecordingFetcher::new(fetcher));
    let bindings = HostBindings::new(store.clone(), fetches.clone()).with_logger(logs.clone());
    let compiler = ChainCompiler::new(Arc::clone(engine), bindings, request.limits.clone());

    let (result, dropped, error) = match execute(&compiler, &request).await {
        Ok(outcome) => outcome,
        Err(error) => (Value::Null, false, Some(error)),
    };

    TestRunResult {
        result,
        dropped,
        store: store.dump(),
        logs: logs.records(),
        fetches: fetches.activity(),
        error: error.map(TestRunError::from),
    }
}

async fn execute(
    compiler: &ChainCompiler,
    request: &TestRunRequest,
) -> Result<(Value, bool, Option<FunctionError>), FunctionError> {
    let definition = request.functions.iter().fold(
        ChainDefinition::new(TEST_RUN_ENTITY, request.workspace_id.clone()),
        |definition, function| {
            definition.stage(
                StageDefinition::sandboxed(function.clone(), StageRole::Transformation)
                    .with_props(request.variables.clone()),
            )
        },
    );
    let chain = Arc::new(
        compiler
            .compile(&definition)
            .await
            .map_err(crate::ChainError::into_function_error)?,
    );

    let outcome = match &request.events {
        Some(events) => {
            let profile = runner::run_profile(
                &chain,
                Arc::new(VecEventsProvider::new(events.clone())),
                Arc::new(request.user.clone()),
                &RunContext::default(),
                None,
            )
            .await
            .map_err(crate::ChainError::into_function_error);
            profile.map(|profile| {
                let result = profile
                    .and_then(|p| serde_json::to_value(p).ok())
                    .unwrap_or(Value::Null);
                (result, false, None)
            })
        }
        None => {
            let run = runner::run(
                &chain,
                request.event.clone(),
                &RunContext::default(),
                &RunOptions::default(),
            )
            .await;
            let error = run
                .execution_log
                .into_iter()
                .filter_map(|entry| entry.error)
                .find(|error| error.kind() != ErrorKind::Drop);
            let dropped = run.events.is_empty() && error.is_none();
            let result = match run.events.len() {
                0 => Value::Null,
                1 => run.events.into_iter().next().unwrap_or(Value::Null),
                _ => Value::Array(run.events),
            };
            Ok((result, dropped, error))
        }
    };

    chain.dispose();
    outcome
}
