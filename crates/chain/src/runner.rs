//! Chain runner.
//!
//! Stages run strictly in order. Each stage receives the output set of the
//! previous one; the run stops early once that set is empty. Every
//! (function, event) pair produces one [`ExecutionLogEntry`].

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use rotor_core::{
    ErrorKind, ExecutionLog, ExecutionLogEntry, FunctionError, MetricsMeta, Profile,
    is_drop_result,
};
use rotor_ports::{EventsProvider, UserProvider, VecEventsProvider};
use rotor_sandbox::{FOLD_EXPORT, HANDLE_EXPORT, SandboxError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chain::Chain;
use crate::error::ChainError;
use crate::func::{Executor, StageRole};
use crate::scope::ReplayScope;

/// Per-run inputs shared by every stage.
#[derive(Debug, Clone, PartialEq)]
pub struct RunContext {
    /// Passed to user code as `context` next to the function's own view
    /// (headers, ingest type, retry count, ...).
    pub event_context: Value,
    /// Echoed into every log entry.
    pub metrics_meta: Option<MetricsMeta>,
}

impl Default for RunContext {
    fn default() -> Self {
        Self {
            event_context: Value::Object(serde_json::Map::new()),
            metrics_meta: None,
        }
    }
}

/// Replaces a chain whose sandbox was found disposed mid-run.
#[async_trait]
pub trait ChainRecovery: Send + Sync {
    /// The live chain for the same entity, rebuilding it if needed.
    async fn recover(&self, stale: &Arc<Chain>) -> Result<Arc<Chain>, ChainError>;
}

/// Knobs for one run.
#[derive(Clone, Default)]
pub struct RunOptions {
    /// Hand the working event itself to native stages instead of a copy.
    /// Sandboxed stages always receive copies.
    pub fast: bool,
    /// Stages to run.
    pub scope: ReplayScope,
    /// Used once per call when the sandbox turns out to be disposed.
    pub recovery: Option<Arc<dyn ChainRecovery>>,
}

impl std::fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOptions")
            .field("fast", &self.fast)
            .field("scope", &self.scope)
            .field("recovery", &self.recovery.is_some())
            .finish()
    }
}

/// Outcome of a per-event run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainResult {
    /// Events that made it through every stage.
    pub events: Vec<Value>,
    /// One entry per (function, event) pair, in execution order.
    pub execution_log: ExecutionLog,
}

impl ChainResult {
    /// No event left the chain.
    #[must_use]
    pub fn is_dropped(&self) -> bool {
        self.events.is_empty()
    }
}

enum StageOutput {
    /// Forward the input as it is now.
    Keep,
    Drop,
    One(Value),
    Many(Vec<Value>),
}

fn interpret(result: Option<Value>) -> StageOutput {
    match result {
        None => StageOutput::Keep,
        Some(value) if is_drop_result(&value) => StageOutput::Drop,
        Some(Value::Array(items)) => StageOutput::Many(items),
        Some(value) => StageOutput::One(value),
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

/// Run `chain` against one event.
#[tracing::instrument(level = "debug", skip_all, fields(entity_id = %chain.entity_id()))]
pub async fn run(
    chain: &Arc<Chain>,
    event: Value,
    ctx: &RunContext,
    options: &RunOptions,
) -> ChainResult {
    let mut chain = Arc::clone(chain);
    let mask = options.scope.mask(&chain);
    let last = mask.iter().rposition(|selected| *selected);

    let mut working = vec![event];
    let mut log = ExecutionLog::new();

    for index in 0..mask.len() {
        if !mask[index] {
            continue;
        }
        if working.is_empty() {
            break;
        }
        let is_last = Some(index) == last;
        let mut next = Vec::with_capacity(working.len());

        for (event_index, input) in std::mem::take(&mut working).into_iter().enumerate() {
            let started = Instant::now();
            let (input, outcome) =
                call_stage(&mut chain, index, input, &ctx.event_context, options).await;
            let ms = elapsed_ms(started);
            let func = &chain.functions()[index];

            let entry = match outcome {
                Ok(StageOutput::Keep) => {
                    next.push(input);
                    ExecutionLogEntry::ok(&func.id, event_index, ms)
                }
                Ok(StageOutput::One(out)) => {
                    next.push(out);
                    ExecutionLogEntry::ok(&func.id, event_index, ms)
                }
                Ok(StageOutput::Drop) => {
                    tracing::debug!(function_id = %func.id, event_index, "event dropped");
                    ExecutionLogEntry::ok(&func.id, event_index, ms).with_dropped(true)
                }
                Ok(StageOutput::Many(out)) if out.len() > 1 && !is_last => {
                    let error = func.annotate(FunctionError::fatal(format!(
                        "function #{} ({}) returned {} events; only the last function of a chain may return more than one",
                        index + 1,
                        func.id,
                        out.len()
                    )));
                    tracing::warn!(function_id = %func.id, event_index, %error, "multiplicity violation");
                    ExecutionLogEntry::failed(&func.id, event_index, input, error, ms)
                }
                Ok(StageOutput::Many(out)) => {
                    next.extend(out);
                    ExecutionLogEntry::ok(&func.id, event_index, ms)
                }
                Err(error) => {
                    let drops = error.kind().drops_event();
                    if drops {
                        tracing::debug!(function_id = %func.id, event_index, %error, "function dropped event");
                    } else {
                        tracing::warn!(function_id = %func.id, event_index, %error, "function failed");
                        if func.role == StageRole::Udf {
                            next.push(error.event.clone().unwrap_or_else(|| input.clone()));
                        }
                    }
                    ExecutionLogEntry::failed(&func.id, event_index, input, error, ms)
                }
            };
            log.push(entry.with_metrics_meta(ctx.metrics_meta.clone()));
        }
        working = next;
    }

    ChainResult {
        events: working,
        execution_log: log,
    }
}

/// Run one stage on one event. Returns the input back, in the state the
/// stage left it, alongside the outcome.
async fn call_stage(
    chain: &mut Arc<Chain>,
    index: usize,
    mut event: Value,
    run_context: &Value,
    options: &RunOptions,
) -> (Value, Result<StageOutput, FunctionError>) {
    let func = &chain.functions()[index];
    let native = match &func.executor {
        Executor::Native(native) => Some(Arc::clone(native)),
        Executor::Sandboxed => None,
    };

    if let Some(native) = native {
        let result = if options.fast {
            native
                .call(&mut event, &func.context, chain.context())
                .await
                .map(interpret)
        } else {
            let mut copy = event.clone();
            match native.call(&mut copy, &func.context, chain.context()).await {
                Ok(None) => Ok(StageOutput::One(copy)),
                other => other.map(interpret),
            }
        };
        let result = result.map_err(|error| func.annotate(error));
        return (event, result);
    }

    let function_id = func.id.clone();
    let args = [event, func.context.to_value(run_context)];
    let result = invoke_sandboxed(chain, &function_id, &args, options).await;
    let [event, _] = args;
    let result = result.map(interpret).map_err(|error| {
        let error = error.into_function_error();
        match chain.position(&function_id) {
            Some(position) => chain.functions()[position].annotate(error),
            None => error.with_function_id(&function_id),
        }
    });
    (event, result)
}

async fn invoke_once(
    chain: &Chain,
    function_id: &str,
    entry: &str,
    args: &[Value],
) -> Result<Option<Value>, SandboxError> {
    let sandbox = chain
        .sandbox()
        .ok_or_else(|| SandboxError::UnknownFunction(function_id.to_owned()))?;
    sandbox.invoke(function_id, entry, args).await
}

/// Invoke with at most one recovery: when the sandbox is found disposed,
/// take the live replacement (or have one built) and retry once on it.
/// Only a replacement with the same cache key is taken.
async fn invoke_sandboxed(
    chain: &mut Arc<Chain>,
    function_id: &str,
    args: &[Value],
    options: &RunOptions,
) -> Result<Option<Value>, SandboxError> {
    let result = invoke_once(chain, function_id, HANDLE_EXPORT, args).await;
    if !matches!(&result, Err(err) if err.is_disposed()) {
        return result;
    }
    let Some(recovery) = &options.recovery else {
        return result;
    };

    match recovery.recover(chain).await {
        // A replacement built from another definition has different stages;
        // the run's stage indices would not carry over.
        Ok(fresh) if fresh.cache_key() != chain.cache_key() => {
            tracing::warn!(
                entity_id = %chain.entity_id(),
                function_id,
                "chain was redefined during the run, not recovering"
            );
            result
        }
        Ok(fresh) if !Arc::ptr_eq(&fresh, chain) && fresh.is_alive() => {
            tracing::info!(
                entity_id = %chain.entity_id(),
                function_id,
                "retrying call on replacement chain"
            );
            *chain = fresh;
            invoke_once(chain, function_id, HANDLE_EXPORT, args).await
        }
        Ok(_) => result,
        Err(e) => {
            tracing::warn!(entity_id = %chain.entity_id(), error = %e, "chain recovery failed");
            result
        }
    }
}

/// Fold an event stream and seed user state into a profile.
///
/// Every sandboxed stage exporting `fold` runs once, in chain order, and sees
/// the whole stream: with more than one such stage the stream is buffered
/// and replayed to each. A result `{ traits, tableName? }` is merged over the
/// seed traits, last writer wins. Returns `None` when no stage produced a
/// result.
#[tracing::instrument(level = "debug", skip_all, fields(entity_id = %chain.entity_id()))]
pub async fn run_profile(
    chain: &Arc<Chain>,
    events: Arc<dyn EventsProvider>,
    user: Arc<dyn UserProvider>,
    ctx: &RunContext,
    destination_id: Option<String>,
) -> Result<Option<Profile>, ChainError> {
    let seed = user.user_state().await?;
    let mut profile = Profile::from_seed(&seed, destination_id);
    let mut produced = false;

    let Some(sandbox) = chain.sandbox() else {
        return Ok(None);
    };
    let folds: Vec<_> = chain
        .functions()
        .iter()
        .filter(|func| matches!(func.executor, Executor::Sandboxed))
        .filter(|func| sandbox.has_export(&func.id, FOLD_EXPORT))
        .collect();
    let replay = if folds.len() > 1 {
        Some(drain(events.as_ref()).await?)
    } else {
        None
    };

    for func in folds {
        let stream: Arc<dyn EventsProvider> = match &replay {
            Some(buffered) => Arc::new(VecEventsProvider::new(buffered.clone())),
            None => Arc::clone(&events),
        };
        let args = [func.context.to_value(&ctx.event_context)];
        let result = sandbox
            .invoke_stream(&func.id, FOLD_EXPORT, &args, stream, Arc::clone(&user))
            .await
            .map_err(|e| ChainError::Function {
                function_id: func.id.clone(),
                error: func.annotate(e.into_function_error()),
            })?;

        let Some(result) = result.filter(|r| !is_drop_result(r)) else {
            continue;
        };
        produced = true;
        if let Some(traits) = result.get("traits").and_then(Value::as_object) {
            profile.merge_traits(traits);
        }
        if let Some(table) = result.get("tableName").and_then(Value::as_str) {
            profile.table_name = Some(table.to_owned());
        }
    }

    Ok(produced.then_some(profile))
}

async fn drain(events: &dyn EventsProvider) -> Result<Vec<Value>, ChainError> {
    let mut buffered = Vec::new();
    while let Some(event) = events.next_event().await? {
        buffered.push(event);
    }
    Ok(buffered)
}

/// Re-throw the first retryable error of a run.
///
/// Drop errors are ignored; any other error is logged and swallowed.
pub fn check_error(log: &ExecutionLog, original_event: &Value) -> Result<(), ChainError> {
    let mut retryable = None;
    for entry in log {
        let Some(error) = &entry.error else {
            continue;
        };
        match error.kind() {
            kind if kind.is_retry() => {
                if retryable.is_none() {
                    retryable = Some((entry.function_id.clone(), error.clone()));
                }
            }
            ErrorKind::Drop => {}
            _ => {
                tracing::warn!(function_id = %entry.function_id, %error, "function error swallowed");
            }
        }
    }

    match retryable {
        Some((function_id, error)) => Err(ChainError::Retryable {
            function_id,
            error,
            original_event: original_event.clone(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn interpret_results() {
        assert!(matches!(interpret(None), StageOutput::Keep));
        for sentinel in [json!("drop"), json!([]), json!(null), json!(false)] {
            assert!(matches!(interpret(Some(sentinel)), StageOutput::Drop));
        }
        assert!(matches!(interpret(Some(json!([1, 2]))), StageOutput::Many(v) if v.len() == 2));
        assert!(matches!(interpret(Some(json!({"a": 1}))), StageOutput::One(_)));
    }

    #[test]
    fn check_error_picks_first_retryable() {
        let event = json!({"type": "track"});
        let log = vec![
            ExecutionLogEntry::failed("f0", 0, event.clone(), FunctionError::drop("skip"), 1.0),
            ExecutionLogEntry::failed("f1", 0, event.clone(), FunctionError::plain("meh"), 1.0),
            ExecutionLogEntry::failed("f2", 0, event.clone(), FunctionError::retry("later"), 1.0),
            ExecutionLogEntry::failed("f3", 0, event.clone(), FunctionError::drop_retry("x"), 1.0),
        ];
        let err = check_error(&log, &event).unwrap_err();
        match err {
            ChainError::Retryable {
                function_id,
                error,
                original_event,
            } => {
                assert_eq!(function_id, "f2");
                assert_eq!(error.message, "later");
                assert_eq!(original_event, event);
            }
            other => panic!("expected Retryable, got {other:?}"),
        }
    }

    #[test]
    fn check_error_swallows_the_rest() {
        let log = vec![
            ExecutionLogEntry::ok("f0", 0, 1.0),
            ExecutionLogEntry::failed("f1", 0, json!({}), FunctionError::fatal("bad"), 1.0),
        ];
        assert!(check_error(&log, &json!({})).is_ok());
    }
}
