//! Function sources.

use std::sync::Arc;

use rotor_core::FunctionMeta;
use sha2::{Digest, Sha256};

/// A user function ready to be loaded into a sandbox.
///
/// `source` is a WebAssembly module, binary or text. Immutable once built;
/// `source_hash` is the SHA-256 of the source bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFunction {
    /// Function id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Module bytes (`.wasm` or `.wat`).
    pub source: Arc<[u8]>,
    /// Hex SHA-256 of `source`.
    pub source_hash: String,
    /// Declared metadata; when absent the guest's `meta` export is used.
    pub meta: Option<FunctionMeta>,
}

impl CompiledFunction {
    /// Wrap `source`, hashing it.
    pub fn new(id: impl Into<String>, name: impl Into<String>, source: impl AsRef<[u8]>) -> Self {
        let source: Arc<[u8]> = Arc::from(source.as_ref());
        let source_hash = hex::encode(Sha256::digest(&source));
        Self {
            id: id.into(),
            name: name.into(),
            source,
            source_hash,
            meta: None,
        }
    }

    /// Attach declared metadata.
    pub fn with_meta(mut self, meta: FunctionMeta) -> Self {
        self.meta = Some(meta);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn hash_follows_source() {
        let a = CompiledFunction::new("f", "f", "(module)");
        let b = CompiledFunction::new("g", "g", "(module)");
        let c = CompiledFunction::new("f", "f", "(module )");
        assert_eq!(a.source_hash, b.source_hash);
        assert_ne!(a.source_hash, c.source_hash);
        assert_eq!(a.source_hash.len(), 64);
    }
}
