use anyhow::{Context, Result};
use rotor_core::{FunctionError, InboundMessage};
use rotor_retry::{Failure, RetryRouter, classify_with};

use super::parse_json;
use crate::config::AppConfig;

#[derive(clap::Args)]
pub struct Args {
    /// Function error, as JSON (`{"name": "RetryError", "message": "..."}`)
    #[arg(long)]
    error: String,

    /// Attempt number, 1-based
    #[arg(long, default_value_t = 1)]
    attempt: u32,

    /// Event that failed, as JSON
    #[arg(long, default_value = "{}")]
    event: String,

    /// Connection the event came through
    #[arg(long, default_value = "cli")]
    connection: String,

    /// Topic the event was consumed from
    #[arg(long, default_value = "rotor.events")]
    topic: String,
}

/// Execute the `route` command: classify the error and print the route.
pub fn execute(config: &AppConfig, args: Args) -> Result<()> {
    let error: FunctionError = serde_json::from_value(parse_json("error", &args.error)?)
        .context("--error is not a function error")?;
    let disposition = classify_with(&error, &config.retry.default_policy);
    tracing::debug!(?disposition, attempt = args.attempt, "classified");

    let message = InboundMessage::new(args.connection, parse_json("event", &args.event)?);
    let failure = Failure::new(error, message, args.topic);
    let route = RetryRouter::new(config.retry.clone()).route(&failure, args.attempt);

    println!("{}", serde_json::to_string_pretty(&route)?);
    Ok(())
}
