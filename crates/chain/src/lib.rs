//! # Rotor Chain
//!
//! Sequencing of user functions into pipelines.
//!
//! ## Key Components
//!
//! - **Compiler**: [`ChainCompiler`] turns a [`ChainDefinition`] into a
//!   [`Chain`], one sandbox for all of its user functions
//! - **Runner**: [`run`] pushes one event through every stage,
//!   [`run_profile`] folds an event stream into a [`Profile`](rotor_core::Profile),
//!   [`check_error`] surfaces the first retryable failure
//! - **Cache**: [`ChainCache`] keeps one live chain per entity and swaps in
//!   rebuilds without disturbing in-flight runs
//! - **Replay**: [`ReplayScope`] restricts a retried run to the stages that
//!   still need it
//! - **Test runs**: [`test_run`] executes functions once in a throwaway
//!   environment and reports everything they did
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use rotor_chain::{
//!     ChainCompiler, ChainDefinition, RunContext, RunOptions, StageDefinition, StageRole, run,
//! };
//! use rotor_sandbox::{CompiledFunction, HostBindings, ReqwestFetcher, SandboxEngine, SandboxLimits};
//! use rotor_store::MemoryStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = SandboxEngine::new()?;
//! let bindings = HostBindings::new(Arc::new(MemoryStore::new()), Arc::new(ReqwestFetcher::new()?));
//! let compiler = ChainCompiler::new(engine, bindings, SandboxLimits::default());
//!
//! let source = std::fs::read("enrich.wasm")?;
//! let definition = ChainDefinition::new("conn-1", "ws-1").stage(StageDefinition::sandboxed(
//!     CompiledFunction::new("enrich", "Enrich", source),
//!     StageRole::Udf,
//! ));
//! let chain = Arc::new(compiler.compile(&definition).await?);
//!
//! let result = run(
//!     &chain,
//!     serde_json::json!({"type": "track"}),
//!     &RunContext::default(),
//!     &RunOptions::default(),
//! )
//! .await;
//! println!("{} events out", result.events.len());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod cache;
pub mod chain;
pub mod compiler;
pub mod error;
pub mod func;
pub mod runner;
pub mod scope;
pub mod test_run;

pub use cache::{ChainCache, ChainCacheConfig};
pub use chain::Chain;
pub use compiler::{ChainCompiler, ChainDefinition, StageDefinition, StageSource};
pub use error::ChainError;
pub use func::{
    Capture, ChainContext, Executor, Func, FunctionContext, FunctionIdentity, NativeFunction,
    StageRole,
};
pub use runner::{ChainRecovery, ChainResult, RunContext, RunOptions, check_error, run, run_profile};
pub use scope::ReplayScope;
pub use test_run::{
    ActivityLog, FetchActivity, RecordingFetcher, TestRunError, TestRunRequest, TestRunResult,
    test_run,
};
