//! Compiled chains.

use std::sync::Arc;

use rotor_sandbox::Sandbox;

use crate::func::{ChainContext, Func};

/// An ordered list of stages sharing one set of host bindings.
#[derive(Debug)]
pub struct Chain {
    pub(crate) entity_id: String,
    pub(crate) cache_key: String,
    pub(crate) context: ChainContext,
    pub(crate) sandbox: Option<Arc<Sandbox>>,
    pub(crate) functions: Vec<Func>,
}

impl Chain {
    /// Entity the chain was built for.
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    /// Key the chain is cached under.
    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    /// Shared bindings.
    pub fn context(&self) -> &ChainContext {
        &self.context
    }

    /// Stages in execution order.
    pub fn functions(&self) -> &[Func] {
        &self.functions
    }

    /// Sandbox running the user functions; `None` for all-native chains.
    pub fn sandbox(&self) -> Option<&Arc<Sandbox>> {
        self.sandbox.as_ref()
    }

    /// Ordinal index of a function.
    pub fn position(&self, function_id: &str) -> Option<usize> {
        self.functions.iter().position(|f| f.id == function_id)
    }

    /// Whether the chain can still run.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.sandbox.as_ref().is_none_or(|s| !s.is_disposed())
    }

    /// Dispose the sandbox now.
    pub fn dispose(&self) {
        if let Some(sandbox) = &self.sandbox {
            sandbox.dispose();
        }
    }
}
