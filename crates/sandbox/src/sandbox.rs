//! One isolated sandbox per connection or workspace.
//!
//! A sandbox owns a single wasmtime store holding every function instance
//! of its entity. Calls are serialised through an async mutex. Disposal is
//! final: after it the store is dropped and every call fails with
//! [`SandboxError::Disposed`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use rotor_core::{DisposeReason, FunctionError};
use rotor_ports::{EventsProvider, UserProvider};
use wasmtime::{Instance, Linker, Module, Store, Val, ValType};

use crate::abi::{ALLOC_EXPORT, GuestMemory, MEMORY_EXPORT, unpack};
use crate::config::SandboxLimits;
use crate::engine::SandboxEngine;
use crate::error::SandboxError;
use crate::function::CompiledFunction;
use crate::host::{self, HostBindings, HostState, StreamInputs};
use crate::resolve::resolve;

/// Counters exposed for metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxStats {
    /// Calls that reached a guest.
    pub calls: u64,
    /// Largest linear memory any guest grew to, in bytes.
    pub memory_peak_bytes: usize,
    /// Whether the sandbox is gone.
    pub disposed: bool,
    /// Why it is gone.
    pub dispose_reason: Option<DisposeReason>,
}

#[derive(Clone)]
struct Guest {
    instance: Instance,
    memory: GuestMemory,
}

struct Live {
    store: Store<HostState>,
    guests: HashMap<String, Guest>,
}

enum CallFailure {
    Trap(anyhow::Error),
    Sandbox(SandboxError),
}

/// An isolated execution context for a set of functions.
pub struct Sandbox {
    entity_id: String,
    limits: SandboxLimits,
    live: tokio::sync::Mutex<Option<Live>>,
    exports: HashMap<String, HashSet<String>>,
    disposed: AtomicBool,
    reason: parking_lot::Mutex<Option<DisposeReason>>,
    calls: AtomicU64,
    memory_peak: AtomicUsize,
    _engine: Arc<SandboxEngine>,
}

impl Sandbox {
    /// Compile, link and instantiate `functions` into a fresh store.
    ///
    /// # Errors
    ///
    /// [`SandboxError::Compile`] when any module fails to parse, imports
    /// something outside the allow-list, lacks `memory`/`alloc`, or fails to
    /// instantiate within the call timeout.
    #[tracing::instrument(level = "debug", skip_all, fields(entity_id))]
    pub async fn create(
        engine: &Arc<SandboxEngine>,
        entity_id: impl Into<String>,
        functions: &[CompiledFunction],
        bindings: HostBindings,
        limits: SandboxLimits,
    ) -> Result<Self, SandboxError> {
        let entity_id = entity_id.into();
        tracing::Span::current().record("entity_id", entity_id.as_str());

        let wasm = engine.engine();
        let mut linker = Linker::new(wasm);
        host::link(&mut linker).map_err(|e| SandboxError::Engine(format!("{e:#}")))?;

        let mut store = Store::new(
            wasm,
            HostState::new(bindings, limits.memory_bytes, limits.max_payload_bytes),
        );
        store.limiter(|state| &mut state.limiter);
        store.epoch_deadline_async_yield_and_update(1);

        let mut guests = HashMap::with_capacity(functions.len());
        let mut exports = HashMap::with_capacity(functions.len());

        for function in functions {
            if guests.contains_key(&function.id) {
                return Err(SandboxError::compile(&function.id, "duplicate function id"));
            }
            let module = Module::new(wasm, &*function.source)
                .map_err(|e| SandboxError::compile(&function.id, format!("{e:#}")))?;
            for import in module.imports() {
                resolve(&function.id, import.module(), import.name())?;
            }
            let names: HashSet<String> = module.exports().map(|e| e.name().to_owned()).collect();
            for required in [MEMORY_EXPORT, ALLOC_EXPORT] {
                if !names.contains(required) {
                    return Err(SandboxError::compile(
                        &function.id,
                        format!("module must export `{required}`"),
                    ));
                }
            }

            store.set_epoch_deadline(1);
            let instance = tokio::time::timeout(
                limits.timeout,
                linker.instantiate_async(&mut store, &module),
            )
            .await
            .map_err(|_| SandboxError::compile(&function.id, "instantiation timed out"))?
            .map_err(|e| SandboxError::compile(&function.id, format!("{e:#}")))?;

            let memory = instance
                .get_memory(&mut store, MEMORY_EXPORT)
                .ok_or_else(|| {
                    SandboxError::compile(&function.id, "`memory` export is not a memory")
                })?;
            let alloc = instance
                .get_typed_func::<i32, i32>(&mut store, ALLOC_EXPORT)
                .map_err(|e| SandboxError::compile(&function.id, format!("`alloc`: {e:#}")))?;

            guests.insert(
                function.id.clone(),
                Guest {
                    instance,
                    memory: GuestMemory { memory, alloc },
                },
            );
            exports.insert(function.id.clone(), names);
        }

        let memory_peak = store.data().limiter.peak_bytes();
        tracing::debug!(functions = functions.len(), "sandbox created");

        Ok(Self {
            entity_id,
            limits,
            live: tokio::sync::Mutex::new(Some(Live { store, guests })),
            exports,
            disposed: AtomicBool::new(false),
            reason: parking_lot::Mutex::new(None),
            calls: AtomicU64::new(0),
            memory_peak: AtomicUsize::new(memory_peak),
            _engine: Arc::clone(engine),
        })
    }

    /// Entity (connection or workspace) this sandbox belongs to.
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    /// Ids of the functions loaded into this sandbox.
    pub fn function_ids(&self) -> impl Iterator<Item = &str> {
        self.exports.keys().map(String::as_str)
    }

    /// Whether `function_id` exports `name`.
    #[must_use]
    pub fn has_export(&self, function_id: &str, name: &str) -> bool {
        self.exports
            .get(function_id)
            .is_some_and(|names| names.contains(name))
    }

    /// Call `entry` of `function_id` with JSON copies of `args`.
    ///
    /// The guest receives as many arguments as its signature declares.
    ///
    /// # Errors
    ///
    /// [`SandboxError::Thrown`] when user code throws or traps,
    /// [`SandboxError::Disposed`] when the sandbox is gone or is disposed by
    /// this call (timeout, memory ceiling).
    pub async fn invoke(
        &self,
        function_id: &str,
        entry: &str,
        args: &[serde_json::Value],
    ) -> Result<Option<serde_json::Value>, SandboxError> {
        self.call(function_id, entry, args, None, self.limits.timeout)
            .await
    }

    /// Like [`invoke`](Self::invoke), with an event stream and seed user
    /// state available to the guest and the longer stream deadline.
    ///
    /// # Errors
    ///
    /// Same as [`invoke`](Self::invoke).
    pub async fn invoke_stream(
        &self,
        function_id: &str,
        entry: &str,
        args: &[serde_json::Value],
        events: Arc<dyn EventsProvider>,
        user: Arc<dyn UserProvider>,
    ) -> Result<Option<serde_json::Value>, SandboxError> {
        let stream = StreamInputs { events, user };
        self.call(
            function_id,
            entry,
            args,
            Some(stream),
            self.limits.stream_timeout,
        )
        .await
    }

    /// Whether the sandbox has been disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Why the sandbox was disposed.
    #[must_use]
    pub fn dispose_reason(&self) -> Option<DisposeReason> {
        *self.reason.lock()
    }

    /// Dispose the sandbox. Idempotent.
    ///
    /// When a call is in flight it completes or fails on its own, and the
    /// store is dropped when it returns.
    pub fn dispose(&self) {
        if !self.mark_disposed(DisposeReason::Explicit) {
            return;
        }
        if let Ok(mut live) = self.live.try_lock() {
            live.take();
        }
        tracing::debug!(entity_id = %self.entity_id, "sandbox disposed");
    }

    /// Counters for metrics.
    #[must_use]
    pub fn stats(&self) -> SandboxStats {
        SandboxStats {
            calls: self.calls.load(Ordering::Relaxed),
            memory_peak_bytes: self.memory_peak.load(Ordering::Relaxed),
            disposed: self.is_disposed(),
            dispose_reason: self.dispose_reason(),
        }
    }

    fn mark_disposed(&self, reason: DisposeReason) -> bool {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.reason.lock().get_or_insert(reason);
        true
    }

    fn disposed_error(&self, during_call: bool) -> SandboxError {
        SandboxError::Disposed {
            reason: self.dispose_reason().unwrap_or(DisposeReason::Explicit),
            during_call,
        }
    }

    async fn call(
        &self,
        function_id: &str,
        entry: &str,
        args: &[serde_json::Value],
        stream: Option<StreamInputs>,
        timeout: Duration,
    ) -> Result<Option<serde_json::Value>, SandboxError> {
        if self.is_disposed() {
            return Err(self.disposed_error(false));
        }
        let mut slot = self.live.lock().await;
        if self.is_disposed() {
            slot.take();
            return Err(self.disposed_error(false));
        }
        let Some(live) = slot.as_mut() else {
            return Err(self.disposed_error(false));
        };
        let guest = live
            .guests
            .get(function_id)
            .cloned()
            .ok_or_else(|| SandboxError::UnknownFunction(function_id.to_owned()))?;

        live.store.data_mut().begin_call(function_id, stream);
        live.store.set_epoch_deadline(1);
        self.calls.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();

        let outcome = tokio::time::timeout(
            timeout,
            call_guest(
                &mut live.store,
                guest,
                function_id,
                entry,
                args,
                self.limits.max_payload_bytes,
            ),
        )
        .await;

        let state = live.store.data_mut();
        let thrown = state.end_call();
        let exhausted = state.limiter.exhausted();
        self.memory_peak
            .fetch_max(state.limiter.peak_bytes(), Ordering::Relaxed);

        let reason = match outcome {
            Err(_) => DisposeReason::Timeout,
            Ok(Err(CallFailure::Trap(_))) if exhausted => DisposeReason::MemoryExhausted,
            Ok(result) => {
                if self.is_disposed() {
                    slot.take();
                }
                return match result {
                    Ok(value) => Ok(value),
                    Err(CallFailure::Sandbox(err)) => Err(err),
                    Err(CallFailure::Trap(trap)) => {
                        Err(SandboxError::Thrown(thrown.unwrap_or_else(|| trap_error(&trap))))
                    }
                };
            }
        };

        tracing::warn!(
            entity_id = %self.entity_id,
            function_id,
            %reason,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "disposing sandbox"
        );
        self.mark_disposed(reason);
        slot.take();
        Err(SandboxError::Disposed {
            reason,
            during_call: true,
        })
    }
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("entity_id", &self.entity_id)
            .field("functions", &self.exports.len())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

fn trap_error(trap: &anyhow::Error) -> FunctionError {
    FunctionError::plain(trap.root_cause().to_string()).with_stack(format!("{trap:#}"))
}

fn abi(message: impl Into<String>) -> CallFailure {
    CallFailure::Sandbox(SandboxError::Abi(message.into()))
}

async fn call_guest(
    store: &mut Store<HostState>,
    guest: Guest,
    function_id: &str,
    entry: &str,
    args: &[serde_json::Value],
    max_payload: usize,
) -> Result<Option<serde_json::Value>, CallFailure> {
    let func = guest.instance.get_func(&mut *store, entry).ok_or_else(|| {
        CallFailure::Sandbox(SandboxError::MissingExport {
            function_id: function_id.to_owned(),
            export: entry.to_owned(),
        })
    })?;

    let ty = func.ty(&*store);
    let params: Vec<ValType> = ty.params().collect();
    let results: Vec<ValType> = ty.results().collect();
    if params.len() % 2 != 0 || !params.iter().all(|p| matches!(p, ValType::I32)) {
        return Err(abi(format!("`{entry}` must take (ptr, len) pairs of i32")));
    }
    if params.len() / 2 > args.len() {
        return Err(abi(format!(
            "`{entry}` takes {} arguments, {} available",
            params.len() / 2,
            args.len()
        )));
    }
    if results.len() > 1 || results.first().is_some_and(|r| !matches!(r, ValType::I64)) {
        return Err(abi(format!("`{entry}` must return nothing or an i64")));
    }

    let mut vals = Vec::with_capacity(params.len());
    for arg in &args[..params.len() / 2] {
        let packed = guest
            .memory
            .write_json(store, arg)
            .await
            .map_err(CallFailure::Trap)?;
        let (ptr, len) = unpack(packed);
        vals.push(Val::I32(ptr as i32));
        vals.push(Val::I32(len as i32));
    }

    let mut out = vec![Val::I64(0); results.len()];
    func.call_async(&mut *store, &vals, &mut out)
        .await
        .map_err(CallFailure::Trap)?;

    match out.first() {
        None => Ok(None),
        Some(Val::I64(packed)) => guest
            .memory
            .read_json(&*store, *packed, max_payload)
            .map_err(|e| abi(format!("{e:#}"))),
        Some(_) => Err(abi(format!("`{entry}` returned a non-i64 value"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{FOLD_EXPORT, HANDLE_EXPORT, META_EXPORT};
    use crate::testing;
    use pretty_assertions::assert_eq;
    use rotor_core::{ErrorKind, UserState};
    use rotor_ports::{
        FetchRequest, FetchResponse, Fetcher, FunctionLogger, LogLevel, LogRecord, PortsError,
        QueryExecutor, QueryParams, TtlStore, VecEventsProvider,
    };
    use rotor_store::MemoryStore;
    use serde_json::json;

    struct NoFetch;

    #[async_trait::async_trait]
    impl Fetcher for NoFetch {
        async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, PortsError> {
            Err(PortsError::Connection(format!("offline: {}", request.url)))
        }
    }

    struct EchoFetch;

    #[async_trait::async_trait]
    impl Fetcher for EchoFetch {
        async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, PortsError> {
            Ok(FetchResponse::new(200, request.url, request.method))
        }
    }

    #[derive(Default)]
    struct Collect(parking_lot::Mutex<Vec<LogRecord>>);

    impl FunctionLogger for Collect {
        fn log(&self, record: LogRecord) {
            self.0.lock().push(record);
        }
    }

    struct Rows;

    #[async_trait::async_trait]
    impl QueryExecutor for Rows {
        async fn query(
            &self,
            connection_id: &str,
            sql: &str,
            params: &QueryParams,
        ) -> Result<Vec<serde_json::Value>, PortsError> {
            Ok(vec![json!({"conn": connection_id, "sql": sql, "params": params})])
        }
    }

    fn bindings() -> HostBindings {
        HostBindings::new(Arc::new(MemoryStore::new()), Arc::new(NoFetch))
    }

    fn limits() -> SandboxLimits {
        SandboxLimits {
            memory_bytes: 4 * 1024 * 1024,
            timeout: Duration::from_millis(200),
            stream_timeout: Duration::from_millis(500),
            max_payload_bytes: 1024 * 1024,
        }
    }

    async fn sandbox(functions: &[CompiledFunction]) -> Sandbox {
        sandbox_with(functions, bindings()).await
    }

    async fn sandbox_with(functions: &[CompiledFunction], bindings: HostBindings) -> Sandbox {
        let engine = SandboxEngine::new().unwrap();
        Sandbox::create(&engine, "conn-1", functions, bindings, limits())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn identity_returns_a_copy_of_the_event() {
        let sb = sandbox(&[testing::function("f1", testing::identity())]).await;
        let event = json!({"type": "track", "properties": {"n": 1}});
        let out = sb
            .invoke("f1", HANDLE_EXPORT, &[event.clone(), json!({})])
            .await
            .unwrap();
        assert_eq!(out, Some(event));
        assert_eq!(sb.stats().calls, 1);
    }

    #[tokio::test]
    async fn zero_result_is_none() {
        let sb = sandbox(&[testing::function("f1", testing::returns_nothing())]).await;
        let out = sb.invoke("f1", HANDLE_EXPORT, &[json!({})]).await.unwrap();
        assert_eq!(out, None);
    }

    #[tokio::test]
    async fn thrown_error_keeps_name_and_message() {
        let sb = sandbox(&[testing::function(
            "f1",
            testing::throwing(&json!({"name": "RetryError", "message": "later"})),
        )])
        .await;
        let err = sb.invoke("f1", HANDLE_EXPORT, &[json!({})]).await.unwrap_err();
        let SandboxError::Thrown(thrown) = err else {
            panic!("expected Thrown, got {err:?}");
        };
        assert_eq!(thrown.kind(), ErrorKind::Retry);
        assert_eq!(thrown.message, "later");
        assert!(!sb.is_disposed());
    }

    #[tokio::test]
    async fn trap_without_throw_is_plain_error() {
        let sb = sandbox(&[testing::function("f1", testing::trapping())]).await;
        let err = sb.invoke("f1", HANDLE_EXPORT, &[json!({})]).await.unwrap_err();
        let SandboxError::Thrown(thrown) = err else {
            panic!("expected Thrown, got {err:?}");
        };
        assert_eq!(thrown.kind(), ErrorKind::Unclassified);
        assert!(thrown.message.contains("unreachable"));
        // A trap is not a disposal.
        let out = sb.invoke("f1", HANDLE_EXPORT, &[json!({})]).await;
        assert!(matches!(out, Err(SandboxError::Thrown(_))));
    }

    #[tokio::test]
    async fn timeout_disposes_and_disposal_is_final() {
        let sb = sandbox(&[
            testing::function("slow", testing::spinning()),
            testing::function("fast", testing::identity()),
        ])
        .await;

        let err = sb.invoke("slow", HANDLE_EXPORT, &[json!({})]).await.unwrap_err();
        assert!(matches!(
            err,
            SandboxError::Disposed {
                reason: DisposeReason::Timeout,
                during_call: true
            }
        ));
        assert!(sb.is_disposed());
        assert_eq!(sb.dispose_reason(), Some(DisposeReason::Timeout));

        let err = sb.invoke("fast", HANDLE_EXPORT, &[json!({})]).await.unwrap_err();
        assert!(matches!(
            err,
            SandboxError::Disposed {
                reason: DisposeReason::Timeout,
                during_call: false
            }
        ));
    }

    #[tokio::test]
    async fn memory_ceiling_disposes() {
        // 4 MiB ceiling, 1 page already in use; 100 more pages is ~6.3 MiB.
        let sb = sandbox(&[testing::function("f1", testing::growing(100))]).await;
        let err = sb.invoke("f1", HANDLE_EXPORT, &[json!({})]).await.unwrap_err();
        assert!(matches!(
            err,
            SandboxError::Disposed {
                reason: DisposeReason::MemoryExhausted,
                ..
            }
        ));
        let mapped = err.into_function_error();
        assert_eq!(mapped.kind(), ErrorKind::DropRetry);
        assert!(sb.stats().disposed);
    }

    #[tokio::test]
    async fn growth_under_the_ceiling_is_fine() {
        let sb = sandbox(&[testing::function("f1", testing::growing(2))]).await;
        let out = sb.invoke("f1", HANDLE_EXPORT, &[json!(1)]).await.unwrap();
        assert_eq!(out, Some(json!(1)));
        assert!(sb.stats().memory_peak_bytes >= 3 * 64 * 1024);
    }

    #[tokio::test]
    async fn explicit_dispose_is_idempotent() {
        let sb = sandbox(&[testing::function("f1", testing::identity())]).await;
        sb.dispose();
        sb.dispose();
        assert_eq!(sb.dispose_reason(), Some(DisposeReason::Explicit));
        let err = sb.invoke("f1", HANDLE_EXPORT, &[json!({})]).await.unwrap_err();
        assert!(err.is_disposed());
    }

    #[tokio::test]
    async fn disallowed_import_fails_creation() {
        let engine = SandboxEngine::new().unwrap();
        let err = Sandbox::create(
            &engine,
            "conn-1",
            &[testing::function("f1", testing::importing("wasi_snapshot_preview1", "fd_write"))],
            bindings(),
            limits(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SandboxError::Compile { ref function_id, .. } if function_id == "f1"));
    }

    #[tokio::test]
    async fn wrong_signature_for_allowed_import_fails_creation() {
        let engine = SandboxEngine::new().unwrap();
        let err = Sandbox::create(
            &engine,
            "conn-1",
            &[testing::function("f1", testing::importing("prelude", "log"))],
            bindings(),
            limits(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SandboxError::Compile { .. }));
    }

    #[tokio::test]
    async fn module_without_alloc_is_rejected() {
        let engine = SandboxEngine::new().unwrap();
        let err = Sandbox::create(
            &engine,
            "conn-1",
            &[testing::function("f1", testing::without_alloc())],
            bindings(),
            limits(),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("alloc"));
    }

    #[tokio::test]
    async fn unknown_function_and_missing_export() {
        let sb = sandbox(&[testing::function("f1", testing::identity())]).await;
        assert!(matches!(
            sb.invoke("nope", HANDLE_EXPORT, &[json!({})]).await,
            Err(SandboxError::UnknownFunction(_))
        ));
        assert!(!sb.has_export("f1", META_EXPORT));
        assert!(matches!(
            sb.invoke("f1", META_EXPORT, &[]).await,
            Err(SandboxError::MissingExport { .. })
        ));
    }

    #[tokio::test]
    async fn meta_export_is_readable() {
        let meta = json!({"name": "enricher", "retryPolicy": {"max": 2}});
        let sb = sandbox(&[testing::function("f1", testing::with_meta(&meta))]).await;
        assert!(sb.has_export("f1", META_EXPORT));
        let out = sb.invoke("f1", META_EXPORT, &[]).await.unwrap();
        assert_eq!(out, Some(meta));
    }

    #[tokio::test]
    async fn store_bindings_reach_the_backing_store() {
        let store = Arc::new(MemoryStore::new());
        let bindings = HostBindings::new(store.clone(), Arc::new(NoFetch));
        let sb = sandbox_with(
            &[
                testing::function("w", testing::storing("k", &json!({"v": 1}), Some(&json!(60)))),
                testing::function("r", testing::loading("k")),
            ],
            bindings,
        )
        .await;

        sb.invoke("w", HANDLE_EXPORT, &[json!({})]).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(json!({"v": 1})));
        let ttl = store.ttl("k").await.unwrap();
        assert!((1..=60).contains(&ttl));

        let out = sb.invoke("r", HANDLE_EXPORT, &[json!({})]).await.unwrap();
        assert_eq!(out, Some(json!({"v": 1})));
    }

    #[tokio::test]
    async fn bad_ttl_is_thrown() {
        let sb = sandbox(&[testing::function(
            "w",
            testing::storing("k", &json!(1), Some(&json!("soon"))),
        )])
        .await;
        let err = sb.invoke("w", HANDLE_EXPORT, &[json!({})]).await.unwrap_err();
        assert!(err.to_string().contains("store.set"));
    }

    #[tokio::test]
    async fn retryable_fetch_failure_becomes_retry_error() {
        let sb = sandbox(&[testing::function(
            "f1",
            testing::fetching(&json!({"url": "http://example.invalid"})),
        )])
        .await;
        let err = sb.invoke("f1", HANDLE_EXPORT, &[json!({})]).await.unwrap_err();
        let SandboxError::Thrown(thrown) = err else {
            panic!("expected Thrown, got {err:?}");
        };
        assert_eq!(thrown.kind(), ErrorKind::Retry);
    }

    #[tokio::test]
    async fn fetch_response_envelope() {
        let bindings = HostBindings::new(Arc::new(MemoryStore::new()), Arc::new(EchoFetch));
        let sb = sandbox_with(
            &[testing::function(
                "f1",
                testing::fetching(&json!({"url": "http://h/x", "method": "POST"})),
            )],
            bindings,
        )
        .await;
        let out = sb
            .invoke("f1", HANDLE_EXPORT, &[json!({})])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(out["status"], json!(200));
        assert_eq!(out["ok"], json!(true));
        assert_eq!(out["body"], json!("POST"));
    }

    #[tokio::test]
    async fn log_calls_reach_the_logger() {
        let logger = Arc::new(Collect::default());
        let bindings = bindings().with_logger(logger.clone());
        let sb = sandbox_with(
            &[testing::function("f1", testing::logging(2, "careful"))],
            bindings,
        )
        .await;
        sb.invoke("f1", HANDLE_EXPORT, &[json!({})]).await.unwrap();
        let records = logger.0.lock();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].function_id, "f1");
        assert_eq!(records[0].level, LogLevel::Warn);
        assert_eq!(records[0].message, "careful");
    }

    #[tokio::test]
    async fn query_without_warehouse_throws_and_with_one_returns_rows() {
        let request = json!({"connectionId": "wh", "sql": "SELECT :a", "params": {"a": 1}});
        let sb = sandbox(&[testing::function("f1", testing::querying(&request))]).await;
        let err = sb.invoke("f1", HANDLE_EXPORT, &[json!({})]).await.unwrap_err();
        assert!(err.to_string().contains("not available"));

        let sb = sandbox_with(
            &[testing::function("f1", testing::querying(&request))],
            bindings().with_query(Arc::new(Rows)),
        )
        .await;
        let out = sb.invoke("f1", HANDLE_EXPORT, &[json!({})]).await.unwrap();
        assert_eq!(
            out,
            Some(json!([{"conn": "wh", "sql": "SELECT :a", "params": {"a": 1}}]))
        );
    }

    #[tokio::test]
    async fn crypto_helpers() {
        let sb = sandbox(&[
            testing::function("h", testing::hashing("md5", "hello")),
            testing::function("u", testing::uuid()),
        ])
        .await;
        let out = sb.invoke("h", HANDLE_EXPORT, &[json!({})]).await.unwrap();
        assert_eq!(out, Some(json!("5d41402abc4b2a76b9719d911017c592")));

        let out = sb.invoke("u", HANDLE_EXPORT, &[json!({})]).await.unwrap();
        let id = out.and_then(|v| v.as_str().map(str::to_owned)).unwrap();
        assert!(uuid::Uuid::parse_str(&id).is_ok());
    }

    #[tokio::test]
    async fn stream_fold_sees_events_and_user_state() {
        let sb = sandbox(&[
            testing::function("last", testing::last_event()),
            testing::function("user", testing::user_state()),
        ])
        .await;
        let user = Arc::new(UserState {
            profile_id: "p1".into(),
            ..UserState::default()
        });

        let events = Arc::new(VecEventsProvider::new(vec![json!({"n": 1}), json!({"n": 2})]));
        let out = sb
            .invoke_stream("last", FOLD_EXPORT, &[json!({})], events, user.clone())
            .await
            .unwrap();
        assert_eq!(out, Some(json!({"n": 2})));

        let events = Arc::new(VecEventsProvider::new(Vec::new()));
        let out = sb
            .invoke_stream("user", FOLD_EXPORT, &[json!({})], events, user)
            .await
            .unwrap();
        assert_eq!(out.unwrap()["profileId"], json!("p1"));
    }

    #[tokio::test]
    async fn stream_inputs_are_absent_outside_stream_calls() {
        let sb = sandbox(&[testing::function("last", testing::last_event())]).await;
        let out = sb.invoke("last", FOLD_EXPORT, &[json!({})]).await.unwrap();
        assert_eq!(out, None);
    }
}
