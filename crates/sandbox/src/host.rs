//! Host functions linked into every guest.
//!
//! Each host call reads its arguments from guest memory, runs against the
//! sandbox's [`HostBindings`] and writes a JSON result back through the
//! guest allocator. A failing host call records a [`FunctionError`] on the
//! call state and traps the guest; the sandbox surfaces the recorded error
//! instead of the trap.

use std::sync::Arc;

use anyhow::anyhow;
use md5::Md5;
use rotor_core::FunctionError;
use rotor_ports::{
    EventsProvider, FetchRequest, Fetcher, FunctionLogger, LogLevel, LogRecord, PortsError,
    QueryExecutor, QueryParams, TracingLogger, Ttl, TtlStore, UserProvider,
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256, Sha512};
use wasmtime::{Caller, Extern, Linker};

use crate::abi::{ALLOC_EXPORT, GuestMemory, MEMORY_EXPORT};
use crate::limiter::MemoryLimiter;
use crate::resolve::{CRYPTO, PRELUDE};

/// Largest buffer `crypto.random_bytes` hands out.
pub const MAX_RANDOM_BYTES: i32 = 64 * 1024;

/// Capabilities a sandbox exposes to its guests.
#[derive(Clone)]
pub struct HostBindings {
    /// Backing store for `store_*`.
    pub store: Arc<dyn TtlStore>,
    /// Backing client for `fetch`.
    pub fetch: Arc<dyn Fetcher>,
    /// Warehouse for `query`; calls fail when absent.
    pub query: Option<Arc<dyn QueryExecutor>>,
    /// Sink for `log`.
    pub logger: Arc<dyn FunctionLogger>,
}

impl HostBindings {
    /// Bindings with no warehouse and logs forwarded to `tracing`.
    pub fn new(store: Arc<dyn TtlStore>, fetch: Arc<dyn Fetcher>) -> Self {
        Self {
            store,
            fetch,
            query: None,
            logger: Arc::new(TracingLogger),
        }
    }

    /// Enable `query`.
    #[must_use]
    pub fn with_query(mut self, query: Arc<dyn QueryExecutor>) -> Self {
        self.query = Some(query);
        self
    }

    /// Replace the log sink.
    #[must_use]
    pub fn with_logger(mut self, logger: Arc<dyn FunctionLogger>) -> Self {
        self.logger = logger;
        self
    }
}

impl std::fmt::Debug for HostBindings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostBindings")
            .field("query", &self.query.is_some())
            .finish_non_exhaustive()
    }
}

/// Inputs of a stream-fold call.
#[derive(Clone)]
pub(crate) struct StreamInputs {
    pub(crate) events: Arc<dyn EventsProvider>,
    pub(crate) user: Arc<dyn UserProvider>,
}

/// Per-call scratch state.
#[derive(Default)]
pub(crate) struct CallState {
    pub(crate) function_id: String,
    pub(crate) thrown: Option<FunctionError>,
    pub(crate) stream: Option<StreamInputs>,
}

/// Store data shared by every guest in one sandbox.
pub(crate) struct HostState {
    pub(crate) bindings: HostBindings,
    pub(crate) limiter: MemoryLimiter,
    pub(crate) call: CallState,
    pub(crate) max_payload: usize,
}

impl HostState {
    pub(crate) fn new(bindings: HostBindings, memory_bytes: usize, max_payload: usize) -> Self {
        Self {
            bindings,
            limiter: MemoryLimiter::new(memory_bytes),
            call: CallState::default(),
            max_payload,
        }
    }

    pub(crate) fn begin_call(&mut self, function_id: &str, stream: Option<StreamInputs>) {
        self.call = CallState {
            function_id: function_id.to_owned(),
            thrown: None,
            stream,
        };
    }

    /// Clear the call state, returning whatever the guest threw.
    pub(crate) fn end_call(&mut self) -> Option<FunctionError> {
        std::mem::take(&mut self.call).thrown
    }
}

/// Register every allowed host import.
pub(crate) fn link(linker: &mut Linker<HostState>) -> anyhow::Result<()> {
    linker.func_wrap(PRELUDE, "log", host_log)?;
    linker.func_wrap(PRELUDE, "throw", host_throw)?;
    linker.func_wrap_async(
        PRELUDE,
        "fetch",
        |caller: Caller<'_, HostState>, (ptr, len): (i32, i32)| {
            Box::new(host_fetch(caller, ptr, len))
        },
    )?;
    linker.func_wrap_async(
        PRELUDE,
        "store_get",
        |caller: Caller<'_, HostState>, (ptr, len): (i32, i32)| {
            Box::new(host_store_get(caller, ptr, len))
        },
    )?;
    linker.func_wrap_async(
        PRELUDE,
        "store_set",
        |caller: Caller<'_, HostState>,
         (kp, kl, vp, vl, tp, tl): (i32, i32, i32, i32, i32, i32)| {
            Box::new(host_store_set(caller, (kp, kl), (vp, vl), (tp, tl)))
        },
    )?;
    linker.func_wrap_async(
        PRELUDE,
        "store_del",
        |caller: Caller<'_, HostState>, (ptr, len): (i32, i32)| {
            Box::new(host_store_del(caller, ptr, len))
        },
    )?;
    linker.func_wrap_async(
        PRELUDE,
        "store_ttl",
        |caller: Caller<'_, HostState>, (ptr, len): (i32, i32)| {
            Box::new(host_store_ttl(caller, ptr, len))
        },
    )?;
    linker.func_wrap_async(
        PRELUDE,
        "query",
        |caller: Caller<'_, HostState>, (ptr, len): (i32, i32)| {
            Box::new(host_query(caller, ptr, len))
        },
    )?;
    linker.func_wrap_async(
        PRELUDE,
        "next_event",
        |caller: Caller<'_, HostState>, (): ()| Box::new(host_next_event(caller)),
    )?;
    linker.func_wrap_async(
        PRELUDE,
        "user_state",
        |caller: Caller<'_, HostState>, (): ()| Box::new(host_user_state(caller)),
    )?;
    linker.func_wrap_async(
        CRYPTO,
        "hash",
        |caller: Caller<'_, HostState>, (ap, al, dp, dl): (i32, i32, i32, i32)| {
            Box::new(host_hash(caller, (ap, al), (dp, dl)))
        },
    )?;
    linker.func_wrap_async(
        CRYPTO,
        "random_uuid",
        |caller: Caller<'_, HostState>, (): ()| Box::new(host_random_uuid(caller)),
    )?;
    linker.func_wrap_async(
        CRYPTO,
        "random_bytes",
        |caller: Caller<'_, HostState>, (n,): (i32,)| Box::new(host_random_bytes(caller, n)),
    )?;
    linker.func_wrap(CRYPTO, "random_int", host_random_int)?;
    Ok(())
}

fn guest(caller: &mut Caller<'_, HostState>) -> anyhow::Result<GuestMemory> {
    let memory = caller
        .get_export(MEMORY_EXPORT)
        .and_then(Extern::into_memory)
        .ok_or_else(|| anyhow!("guest does not export `{MEMORY_EXPORT}`"))?;
    let alloc = caller
        .get_export(ALLOC_EXPORT)
        .and_then(Extern::into_func)
        .ok_or_else(|| anyhow!("guest does not export `{ALLOC_EXPORT}`"))?
        .typed::<i32, i32>(&*caller)?;
    Ok(GuestMemory { memory, alloc })
}

/// Record `error` as the call's outcome and return the trap that unwinds
/// the guest. The first recorded error wins.
fn raise(caller: &mut Caller<'_, HostState>, error: FunctionError) -> anyhow::Error {
    let trap = anyhow!("{error}");
    caller.data_mut().call.thrown.get_or_insert(error);
    trap
}

fn port_failure(operation: &str, err: &PortsError) -> FunctionError {
    let message = format!("{operation} failed: {err}");
    if err.is_retryable() {
        FunctionError::retry(message)
    } else {
        FunctionError::plain(message)
    }
}

fn read_bytes(
    caller: &mut Caller<'_, HostState>,
    guest: &GuestMemory,
    (ptr, len): (i32, i32),
) -> anyhow::Result<Vec<u8>> {
    let max = caller.data().max_payload;
    guest.read(&*caller, ptr as u32, len as u32, max)
}

fn read_text(
    caller: &mut Caller<'_, HostState>,
    guest: &GuestMemory,
    span: (i32, i32),
) -> anyhow::Result<String> {
    let bytes = read_bytes(caller, guest, span)?;
    String::from_utf8(bytes).map_err(|_| anyhow!("guest string is not UTF-8"))
}

fn read_arg<T: DeserializeOwned>(
    caller: &mut Caller<'_, HostState>,
    guest: &GuestMemory,
    span: (i32, i32),
    operation: &str,
) -> anyhow::Result<T> {
    let bytes = read_bytes(caller, guest, span)?;
    serde_json::from_slice(&bytes).map_err(|e| {
        raise(
            caller,
            FunctionError::plain(format!("{operation}: invalid argument: {e}")),
        )
    })
}

async fn write_value(
    caller: &mut Caller<'_, HostState>,
    guest: &GuestMemory,
    value: Option<serde_json::Value>,
) -> anyhow::Result<i64> {
    match value {
        Some(value) => guest.write_json(caller, &value).await,
        None => Ok(0),
    }
}

fn parse_thrown(bytes: &[u8]) -> FunctionError {
    match serde_json::from_slice::<serde_json::Value>(bytes) {
        Ok(serde_json::Value::String(message)) => FunctionError::plain(message),
        Ok(value @ serde_json::Value::Object(_)) => serde_json::from_value(value)
            .unwrap_or_else(|e| FunctionError::plain(format!("malformed error: {e}"))),
        Ok(other) => FunctionError::plain(other.to_string()),
        Err(_) => FunctionError::plain(String::from_utf8_lossy(bytes)),
    }
}

fn host_log(
    mut caller: Caller<'_, HostState>,
    level: i32,
    ptr: i32,
    len: i32,
) -> anyhow::Result<()> {
    let guest = guest(&mut caller)?;
    let message = read_text(&mut caller, &guest, (ptr, len))?;
    let state = caller.data();
    state.bindings.logger.log(LogRecord {
        function_id: state.call.function_id.clone(),
        level: LogLevel::from_code(level),
        message,
        timestamp: chrono::Utc::now(),
    });
    Ok(())
}

fn host_throw(mut caller: Caller<'_, HostState>, ptr: i32, len: i32) -> anyhow::Result<()> {
    let guest = guest(&mut caller)?;
    let bytes = read_bytes(&mut caller, &guest, (ptr, len))?;
    let error = parse_thrown(&bytes);
    Err(raise(&mut caller, error))
}

async fn host_fetch(mut caller: Caller<'_, HostState>, ptr: i32, len: i32) -> anyhow::Result<i64> {
    let guest = guest(&mut caller)?;
    let request: FetchRequest = read_arg(&mut caller, &guest, (ptr, len), "fetch")?;
    let fetcher = Arc::clone(&caller.data().bindings.fetch);
    tracing::debug!(url = %request.url, method = %request.method, "guest fetch");
    match fetcher.fetch(request).await {
        Ok(response) => {
            let value = serde_json::to_value(response)?;
            write_value(&mut caller, &guest, Some(value)).await
        }
        Err(e) => Err(raise(&mut caller, port_failure("fetch", &e))),
    }
}

async fn host_store_get(
    mut caller: Caller<'_, HostState>,
    ptr: i32,
    len: i32,
) -> anyhow::Result<i64> {
    let guest = guest(&mut caller)?;
    let key = read_text(&mut caller, &guest, (ptr, len))?;
    let store = Arc::clone(&caller.data().bindings.store);
    match store.get(&key).await {
        Ok(value) => write_value(&mut caller, &guest, value).await,
        Err(e) => Err(raise(&mut caller, port_failure("store.get", &e))),
    }
}

async fn host_store_set(
    mut caller: Caller<'_, HostState>,
    key: (i32, i32),
    value: (i32, i32),
    ttl: (i32, i32),
) -> anyhow::Result<()> {
    let guest = guest(&mut caller)?;
    let key = read_text(&mut caller, &guest, key)?;
    let value: serde_json::Value = read_arg(&mut caller, &guest, value, "store.set")?;
    let ttl = if ttl.1 == 0 {
        None
    } else {
        let raw: serde_json::Value = read_arg(&mut caller, &guest, ttl, "store.set")?;
        match Ttl::from_json(&raw) {
            Ok(ttl) => Some(ttl),
            Err(e) => return Err(raise(&mut caller, port_failure("store.set", &e))),
        }
    };
    let store = Arc::clone(&caller.data().bindings.store);
    store
        .set(&key, value, ttl)
        .await
        .map_err(|e| raise(&mut caller, port_failure("store.set", &e)))
}

async fn host_store_del(mut caller: Caller<'_, HostState>, ptr: i32, len: i32) -> anyhow::Result<()> {
    let guest = guest(&mut caller)?;
    let key = read_text(&mut caller, &guest, (ptr, len))?;
    let store = Arc::clone(&caller.data().bindings.store);
    store
        .del(&key)
        .await
        .map_err(|e| raise(&mut caller, port_failure("store.del", &e)))
}

async fn host_store_ttl(
    mut caller: Caller<'_, HostState>,
    ptr: i32,
    len: i32,
) -> anyhow::Result<i64> {
    let guest = guest(&mut caller)?;
    let key = read_text(&mut caller, &guest, (ptr, len))?;
    let store = Arc::clone(&caller.data().bindings.store);
    store
        .ttl(&key)
        .await
        .map_err(|e| raise(&mut caller, port_failure("store.ttl", &e)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest {
    connection_id: String,
    sql: String,
    #[serde(default)]
    params: QueryParams,
}

async fn host_query(mut caller: Caller<'_, HostState>, ptr: i32, len: i32) -> anyhow::Result<i64> {
    let guest = guest(&mut caller)?;
    let request: QueryRequest = read_arg(&mut caller, &guest, (ptr, len), "query")?;
    let Some(executor) = caller.data().bindings.query.clone() else {
        return Err(raise(
            &mut caller,
            FunctionError::plain("warehouse queries are not available"),
        ));
    };
    match executor
        .query(&request.connection_id, &request.sql, &request.params)
        .await
    {
        Ok(rows) => write_value(&mut caller, &guest, Some(serde_json::Value::Array(rows))).await,
        Err(e) => Err(raise(&mut caller, port_failure("query", &e))),
    }
}

async fn host_next_event(mut caller: Caller<'_, HostState>) -> anyhow::Result<i64> {
    let guest = guest(&mut caller)?;
    let Some(stream) = caller.data().call.stream.clone() else {
        return Ok(0);
    };
    match stream.events.next_event().await {
        Ok(event) => write_value(&mut caller, &guest, event).await,
        Err(e) => Err(raise(&mut caller, port_failure("events", &e))),
    }
}

async fn host_user_state(mut caller: Caller<'_, HostState>) -> anyhow::Result<i64> {
    let guest = guest(&mut caller)?;
    let Some(stream) = caller.data().call.stream.clone() else {
        return Ok(0);
    };
    match stream.user.user_state().await {
        Ok(state) => {
            let value = serde_json::to_value(state)?;
            write_value(&mut caller, &guest, Some(value)).await
        }
        Err(e) => Err(raise(&mut caller, port_failure("user state", &e))),
    }
}

/// Hex digest of `data` with a named algorithm.
pub(crate) fn digest(algorithm: &str, data: &[u8]) -> Option<String> {
    match algorithm.to_ascii_lowercase().as_str() {
        "sha256" | "sha-256" => Some(hex::encode(Sha256::digest(data))),
        "sha512" | "sha-512" => Some(hex::encode(Sha512::digest(data))),
        "md5" => Some(hex::encode(Md5::digest(data))),
        _ => None,
    }
}

async fn host_hash(
    mut caller: Caller<'_, HostState>,
    algorithm: (i32, i32),
    data: (i32, i32),
) -> anyhow::Result<i64> {
    let guest = guest(&mut caller)?;
    let algorithm = read_text(&mut caller, &guest, algorithm)?;
    let data = read_bytes(&mut caller, &guest, data)?;
    let Some(hex) = digest(&algorithm, &data) else {
        return Err(raise(
            &mut caller,
            FunctionError::plain(format!("unsupported hash algorithm: {algorithm}")),
        ));
    };
    write_value(&mut caller, &guest, Some(serde_json::Value::String(hex))).await
}

async fn host_random_uuid(mut caller: Caller<'_, HostState>) -> anyhow::Result<i64> {
    let guest = guest(&mut caller)?;
    let id = uuid::Uuid::new_v4().to_string();
    write_value(&mut caller, &guest, Some(serde_json::Value::String(id))).await
}

async fn host_random_bytes(mut caller: Caller<'_, HostState>, n: i32) -> anyhow::Result<i64> {
    let guest = guest(&mut caller)?;
    if !(0..=MAX_RANDOM_BYTES).contains(&n) {
        return Err(raise(
            &mut caller,
            FunctionError::plain(format!(
                "random_bytes: size must be between 0 and {MAX_RANDOM_BYTES}, got {n}"
            )),
        ));
    }
    let bytes: Vec<u8> = std::iter::repeat_with(|| fastrand::u8(..))
        .take(n as usize)
        .collect();
    write_value(
        &mut caller,
        &guest,
        Some(serde_json::Value::String(hex::encode(bytes))),
    )
    .await
}

fn host_random_int(mut caller: Caller<'_, HostState>, min: i64, max: i64) -> anyhow::Result<i64> {
    if min >= max {
        return Err(raise(
            &mut caller,
            FunctionError::plain(format!("random_int: empty range {min}..{max}")),
        ));
    }
    Ok(fastrand::i64(min..max))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rotor_core::ErrorKind;
    use rstest::rstest;

    #[rstest]
    #[case("sha256", "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824")]
    #[case("SHA-256", "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824")]
    #[case("md5", "5d41402abc4b2a76b9719d911017c592")]
    fn digests(#[case] algorithm: &str, #[case] expected: &str) {
        assert_eq!(digest(algorithm, b"hello").as_deref(), Some(expected));
    }

    #[test]
    fn sha512_length_and_unknown_algorithm() {
        assert_eq!(digest("sha512", b"hello").map(|h| h.len()), Some(128));
        assert_eq!(digest("crc32", b"hello"), None);
    }

    #[test]
    fn thrown_payload_shapes() {
        let err = parse_thrown(br#"{"name": "DropError", "message": "skip"}"#);
        assert_eq!(err.kind(), ErrorKind::Drop);
        assert_eq!(err.message, "skip");

        let err = parse_thrown(br#""boom""#);
        assert_eq!(err.kind(), ErrorKind::Unclassified);
        assert_eq!(err.message, "boom");

        let err = parse_thrown(b"not json");
        assert_eq!(err.message, "not json");
    }

    #[test]
    fn retryable_port_failures_become_retry_errors() {
        let err = port_failure("fetch", &PortsError::Connection("refused".into()));
        assert_eq!(err.kind(), ErrorKind::Retry);
        let err = port_failure("fetch", &PortsError::InvalidArgument("bad url".into()));
        assert_eq!(err.kind(), ErrorKind::Unclassified);
    }
}
