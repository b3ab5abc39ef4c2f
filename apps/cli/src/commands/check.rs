use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use rotor_sandbox::{HostBindings, ReqwestFetcher, Sandbox, SandboxEngine};
use rotor_store::MemoryStore;

use super::load_function;
use crate::config::AppConfig;

/// Execute the `check` command: compile and link each module on its own.
pub async fn execute(config: &AppConfig, files: &[PathBuf]) -> Result<()> {
    let engine = SandboxEngine::new()?;
    let fetch = Arc::new(ReqwestFetcher::with_timeout(config.fetch.timeout)?);
    let mut failed = 0usize;

    for path in files {
        let outcome = match load_function(path) {
            Ok(function) => {
                let bindings = HostBindings::new(Arc::new(MemoryStore::new()), fetch.clone());
                Sandbox::create(
                    &engine,
                    format!("check:{}", function.id),
                    std::slice::from_ref(&function),
                    bindings,
                    config.sandbox.clone(),
                )
                .await
                .map(|sandbox| sandbox.dispose())
                .map_err(anyhow::Error::from)
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => println!("{:40} OK", path.display()),
            Err(e) => {
                failed += 1;
                println!("{:40} FAILED", path.display());
                println!("  {e:#}");
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} modules failed to compile", files.len())
    }
    Ok(())
}
