use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use rotor_chain::{TestRunRequest, test_run};
use rotor_sandbox::{ReqwestFetcher, SandboxEngine};
use serde_json::Value;

use super::{load_function, parse_json};
use crate::config::AppConfig;

#[derive(clap::Args)]
pub struct Args {
    /// Function modules, in chain order
    #[arg(long = "function", required = true)]
    functions: Vec<PathBuf>,

    /// Event to run, as JSON
    #[arg(long, default_value = "{}")]
    event: String,

    /// JSON array of events; runs the stream fold instead
    #[arg(long)]
    events_file: Option<PathBuf>,

    /// Variable handed to every function, `key=value` (value may be JSON)
    #[arg(long = "var", value_parser = parse_var)]
    vars: Vec<(String, Value)>,

    /// Initial store contents, as a JSON object
    #[arg(long)]
    store: Option<String>,

    /// Workspace the functions run in
    #[arg(long, default_value = "test")]
    workspace: String,
}

fn parse_var(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{raw}`"))?;
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_owned()));
    Ok((key.to_owned(), value))
}

/// Execute the `test-run` command.
pub async fn execute(config: &AppConfig, args: Args) -> Result<()> {
    let functions = args
        .functions
        .iter()
        .map(|path| load_function(path))
        .collect::<Result<Vec<_>>>()?;

    let mut request = TestRunRequest::new(functions, parse_json("event", &args.event)?);
    request.workspace_id = args.workspace;
    request.limits = config.sandbox.clone();
    request.variables = args.vars.into_iter().collect();

    if let Some(path) = &args.events_file {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let events: Vec<Value> = serde_json::from_str(&raw)
            .with_context(|| format!("{} must hold a JSON array of events", path.display()))?;
        request.events = Some(events);
    }
    if let Some(raw) = &args.store {
        let store: BTreeMap<String, Value> =
            serde_json::from_str(raw).context("--store must be a JSON object")?;
        request.store = store;
    }

    let engine = SandboxEngine::new()?;
    let fetch = Arc::new(ReqwestFetcher::with_timeout(config.fetch.timeout)?);
    let result = test_run(&engine, fetch, request).await;
    if let Some(error) = &result.error {
        tracing::warn!(name = %error.name, message = %error.message, "test run failed");
    }

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
