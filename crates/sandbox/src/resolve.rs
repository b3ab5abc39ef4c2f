//! Closed import graph.
//!
//! Every import of a guest module is resolved once, at link time, against a
//! fixed allow-list. There is no other way for a guest to reach the host.

use crate::error::SandboxError;

/// Host namespace with logging, fetch, store, query and stream inputs.
pub const PRELUDE: &str = "prelude";
/// Host namespace with hashing and randomness.
pub const CRYPTO: &str = "crypto";

/// A host function a guest may import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostImport {
    /// `prelude.log(level, ptr, len)`
    Log,
    /// `prelude.throw(ptr, len)`
    Throw,
    /// `prelude.fetch(ptr, len) -> packed`
    Fetch,
    /// `prelude.store_get(kptr, klen) -> packed`
    StoreGet,
    /// `prelude.store_set(kptr, klen, vptr, vlen, tptr, tlen)`
    StoreSet,
    /// `prelude.store_del(kptr, klen)`
    StoreDel,
    /// `prelude.store_ttl(kptr, klen) -> seconds`
    StoreTtl,
    /// `prelude.query(ptr, len) -> packed`
    Query,
    /// `prelude.next_event() -> packed`
    NextEvent,
    /// `prelude.user_state() -> packed`
    UserState,
    /// `crypto.hash(aptr, alen, dptr, dlen) -> packed`
    Hash,
    /// `crypto.random_uuid() -> packed`
    RandomUuid,
    /// `crypto.random_bytes(n) -> packed`
    RandomBytes,
    /// `crypto.random_int(min, max) -> i64`
    RandomInt,
}

impl HostImport {
    /// Every import, in declaration order.
    pub const ALL: [Self; 14] = [
        Self::Log,
        Self::Throw,
        Self::Fetch,
        Self::StoreGet,
        Self::StoreSet,
        Self::StoreDel,
        Self::StoreTtl,
        Self::Query,
        Self::NextEvent,
        Self::UserState,
        Self::Hash,
        Self::RandomUuid,
        Self::RandomBytes,
        Self::RandomInt,
    ];

    /// `(module, name)` of the import.
    #[must_use]
    pub const fn specifier(self) -> (&'static str, &'static str) {
        match self {
            Self::Log => (PRELUDE, "log"),
            Self::Throw => (PRELUDE, "throw"),
            Self::Fetch => (PRELUDE, "fetch"),
            Self::StoreGet => (PRELUDE, "store_get"),
            Self::StoreSet => (PRELUDE, "store_set"),
            Self::StoreDel => (PRELUDE, "store_del"),
            Self::StoreTtl => (PRELUDE, "store_ttl"),
            Self::Query => (PRELUDE, "query"),
            Self::NextEvent => (PRELUDE, "next_event"),
            Self::UserState => (PRELUDE, "user_state"),
            Self::Hash => (CRYPTO, "hash"),
            Self::RandomUuid => (CRYPTO, "random_uuid"),
            Self::RandomBytes => (CRYPTO, "random_bytes"),
            Self::RandomInt => (CRYPTO, "random_int"),
        }
    }
}

/// Resolve an import specifier against the allow-list.
///
/// # Errors
///
/// [`SandboxError::Compile`] for anything outside `prelude` and `crypto`, or
/// a name those namespaces do not declare.
pub fn resolve(function_id: &str, module: &str, name: &str) -> Result<HostImport, SandboxError> {
    HostImport::ALL
        .into_iter()
        .find(|import| import.specifier() == (module, name))
        .ok_or_else(|| {
            SandboxError::compile(function_id, format!("import `{module}.{name}` is not allowed"))
        })
}
