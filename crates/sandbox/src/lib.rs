//! # Rotor Sandbox
//!
//! WebAssembly execution for user functions.
//!
//! One [`Sandbox`] per connection or workspace holds every function of that
//! entity in a single wasmtime store. Guests reach the host only through the
//! `prelude` and `crypto` import namespaces (see [`resolve`]); everything
//! crosses the boundary as a JSON copy (see [`abi`]).
//!
//! Limits:
//! - memory: a per-store ceiling; growth past it traps the guest and disposes
//!   the sandbox;
//! - time: epoch interruption lets a running guest yield, so a deadline can
//!   drop it; a timed-out sandbox is disposed.
//!
//! Disposal is final. Every later call fails with
//! [`SandboxError::Disposed`], which the pipeline maps to a
//! `SandboxDisposedError`.

#![warn(missing_docs)]

pub mod abi;
pub mod config;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod function;
pub mod host;
mod limiter;
pub mod resolve;
pub mod sandbox;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use abi::{FOLD_EXPORT, HANDLE_EXPORT, META_EXPORT};
pub use config::SandboxLimits;
pub use engine::SandboxEngine;
pub use error::SandboxError;
pub use fetch::ReqwestFetcher;
pub use function::CompiledFunction;
pub use host::HostBindings;
pub use resolve::{HostImport, resolve};
pub use sandbox::{Sandbox, SandboxStats};
