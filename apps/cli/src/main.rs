mod commands;
mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{AppConfig, Overrides};

#[derive(Parser)]
#[command(
    name = "rotor",
    version,
    about = "Run and debug sandboxed event functions"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: ./rotor.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `info` or `warn,rotor_sandbox=debug`
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log format (pretty, compact, json)
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile function modules without running them
    Check {
        /// Function modules (.wasm or .wat)
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Run functions once against an event and print the result as JSON
    TestRun(commands::test_run::Args),
    /// Show where a failed message would be routed
    Route(commands::route::Args),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(
        cli.config.as_deref(),
        &Overrides {
            log_level: cli.log_level,
            log_format: cli.log_format,
        },
    )?;
    let _logger = rotor_log::init(&config.log)?;

    match cli.command {
        Commands::Check { files } => commands::check::execute(&config, &files).await,
        Commands::TestRun(args) => commands::test_run::execute(&config, args).await,
        Commands::Route(args) => commands::route::execute(&config, args),
    }
}
