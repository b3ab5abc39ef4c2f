pub mod check;
pub mod route;
pub mod test_run;

use std::path::Path;

use anyhow::{Context, Result};
use rotor_sandbox::CompiledFunction;

/// Load a function module; its id and name are the file stem.
pub fn load_function(path: &Path) -> Result<CompiledFunction> {
    let source =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let id = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .with_context(|| format!("bad file name: {}", path.display()))?;
    Ok(CompiledFunction::new(id, id, source))
}

/// Parse a JSON argument.
pub fn parse_json(what: &str, raw: &str) -> Result<serde_json::Value> {
    serde_json::from_str(raw).with_context(|| format!("--{what} is not valid JSON"))
}
