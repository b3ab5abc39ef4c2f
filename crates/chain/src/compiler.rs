//! Chain compiler.
//!
//! Turns a [`ChainDefinition`] into a runnable [`Chain`]: one sandbox for all
//! user functions, one [`Func`] per stage with its metadata and bound
//! [`FunctionContext`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rotor_core::FunctionMeta;
use rotor_sandbox::{
    CompiledFunction, HostBindings, META_EXPORT, Sandbox, SandboxEngine, SandboxLimits,
};
use rotor_store::NamespacedStore;
use sha2::{Digest, Sha256};

use crate::chain::Chain;
use crate::error::ChainError;
use crate::func::{
    ChainContext, Executor, Func, FunctionContext, FunctionIdentity, NativeFunction, StageRole,
};

/// What a stage runs.
#[derive(Clone)]
pub enum StageSource {
    /// User code.
    Sandboxed(CompiledFunction),
    /// Built-in stage.
    Native(Arc<dyn NativeFunction>),
}

impl std::fmt::Debug for StageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sandboxed(function) => f.debug_tuple("Sandboxed").field(&function.id).finish(),
            Self::Native(_) => f.write_str("Native"),
        }
    }
}

/// One stage of a chain definition.
#[derive(Debug, Clone)]
pub struct StageDefinition {
    /// Function id, unique within the chain.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Pipeline role.
    pub role: StageRole,
    /// Configured variables.
    pub props: serde_json::Map<String, serde_json::Value>,
    /// What runs.
    pub source: StageSource,
}

impl StageDefinition {
    /// A user function stage.
    pub fn sandboxed(function: CompiledFunction, role: StageRole) -> Self {
        Self {
            id: function.id.clone(),
            name: function.name.clone(),
            role,
            props: serde_json::Map::new(),
            source: StageSource::Sandboxed(function),
        }
    }

    /// A built-in stage.
    pub fn native(id: impl Into<String>, role: StageRole, function: Arc<dyn NativeFunction>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            role,
            props: serde_json::Map::new(),
            source: StageSource::Native(function),
        }
    }

    /// Set the stage's props.
    #[must_use]
    pub fn with_props(mut self, props: serde_json::Map<String, serde_json::Value>) -> Self {
        self.props = props;
        self
    }

    fn source_hash(&self) -> &str {
        match &self.source {
            StageSource::Sandboxed(function) => &function.source_hash,
            StageSource::Native(_) => "native",
        }
    }
}

/// Everything needed to build the chain of one entity.
#[derive(Debug, Clone)]
pub struct ChainDefinition {
    /// Connection or workspace id; one live chain per entity.
    pub entity_id: String,
    /// Owning workspace.
    pub workspace_id: String,
    /// Connection the chain serves, if any.
    pub connection_id: Option<String>,
    /// Last change of the entity's configuration.
    pub updated_at: DateTime<Utc>,
    /// Stages in execution order.
    pub stages: Vec<StageDefinition>,
}

impl ChainDefinition {
    /// Definition with no stages.
    pub fn new(entity_id: impl Into<String>, workspace_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            workspace_id: workspace_id.into(),
            connection_id: None,
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
            stages: Vec::new(),
        }
    }

    /// Append a stage.
    #[must_use]
    pub fn stage(mut self, stage: StageDefinition) -> Self {
        self.stages.push(stage);
        self
    }

    /// Set the connection id.
    #[must_use]
    pub fn with_connection(mut self, connection_id: impl Into<String>) -> Self {
        self.connection_id = Some(connection_id.into());
        self
    }

    /// Set the configuration timestamp.
    #[must_use]
    pub fn updated_at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = updated_at;
        self
    }

    /// Cache key: SHA-256 over the ordered stage ids, roles, props and
    /// source hashes plus `updated_at`.
    pub fn cache_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.entity_id.as_bytes());
        hasher.update([0]);
        for stage in &self.stages {
            hasher.update(stage.id.as_bytes());
            hasher.update([0]);
            hasher.update(format!("{:?}", stage.role).as_bytes());
            hasher.update([0]);
            hasher.update(serde_json::Value::Object(stage.props.clone()).to_string());
            hasher.update([0]);
            hasher.update(stage.source_hash().as_bytes());
            hasher.update([0]);
        }
        hasher.update(self.updated_at.to_rfc3339().as_bytes());
        hex::encode(hasher.finalize())
    }

    fn validate(&self) -> Result<(), ChainError> {
        if self.stages.is_empty() {
            return Err(ChainError::InvalidDefinition(format!(
                "chain for {} has no stages",
                self.entity_id
            )));
        }
        for (i, stage) in self.stages.iter().enumerate() {
            if self.stages[..i].iter().any(|s| s.id == stage.id) {
                return Err(ChainError::InvalidDefinition(format!(
                    "duplicate stage id {}",
                    stage.id
                )));
            }
        }
        Ok(())
    }
}

/// Builds chains on a shared engine.
#[derive(Debug, Clone)]
pub struct ChainCompiler {
    engine: Arc<SandboxEngine>,
    bindings: HostBindings,
    limits: SandboxLimits,
    namespace_store: bool,
}

impl ChainCompiler {
    /// Compiler whose chains share `bindings`.
    pub fn new(engine: Arc<SandboxEngine>, bindings: HostBindings, limits: SandboxLimits) -> Self {
        Self {
            engine,
            bindings,
            limits,
            namespace_store: false,
        }
    }

    /// Prefix store keys with the workspace id of each chain.
    #[must_use]
    pub fn namespaced_store(mut self, enabled: bool) -> Self {
        self.namespace_store = enabled;
        self
    }

    /// Sandbox limits applied to every chain.
    pub fn limits(&self) -> &SandboxLimits {
        &self.limits
    }

    /// Compile `definition`.
    #[tracing::instrument(level = "debug", skip_all, fields(entity_id = %definition.entity_id))]
    pub async fn compile(&self, definition: &ChainDefinition) -> Result<Chain, ChainError> {
        definition.validate()?;

        let mut bindings = self.bindings.clone();
        if self.namespace_store {
            bindings.store = Arc::new(NamespacedStore::new(
                definition.workspace_id.clone(),
                bindings.store,
            ));
        }

        let sandboxed: Vec<CompiledFunction> = definition
            .stages
            .iter()
            .filter_map(|stage| match &stage.source {
                StageSource::Sandboxed(function) => Some(function.clone()),
                StageSource::Native(_) => None,
            })
            .collect();

        let sandbox = if sandboxed.is_empty() {
            None
        } else {
            let sandbox = Sandbox::create(
                &self.engine,
                definition.entity_id.clone(),
                &sandboxed,
                bindings.clone(),
                self.limits.clone(),
            )
            .await
            .map_err(|source| ChainError::Build {
                entity_id: definition.entity_id.clone(),
                source,
            })?;
            Some(Arc::new(sandbox))
        };

        let mut functions = Vec::with_capacity(definition.stages.len());
        for stage in &definition.stages {
            let (meta, executor) = match &stage.source {
                StageSource::Sandboxed(function) => {
                    let meta = match &function.meta {
                        Some(meta) => Some(meta.clone()),
                        None => match &sandbox {
                            Some(sandbox) => exported_meta(sandbox, &function.id).await,
                            None => None,
                        },
                    };
                    (meta, Executor::Sandboxed)
                }
                StageSource::Native(native) => (None, Executor::Native(Arc::clone(native))),
            };
            functions.push(Func {
                id: stage.id.clone(),
                name: stage.name.clone(),
                role: stage.role,
                meta,
                context: FunctionContext {
                    function: FunctionIdentity {
                        id: stage.id.clone(),
                        name: stage.name.clone(),
                    },
                    props: stage.props.clone(),
                    workspace_id: definition.workspace_id.clone(),
                    connection_id: definition.connection_id.clone(),
                },
                executor,
            });
        }

        tracing::info!(stages = functions.len(), "chain compiled");
        Ok(Chain {
            entity_id: definition.entity_id.clone(),
            cache_key: definition.cache_key(),
            context: ChainContext { bindings },
            sandbox,
            functions,
        })
    }
}

async fn exported_meta(sandbox: &Sandbox, function_id: &str) -> Option<FunctionMeta> {
    if !sandbox.has_export(function_id, META_EXPORT) {
        return None;
    }
    match sandbox.invoke(function_id, META_EXPORT, &[]).await {
        Ok(Some(value)) => match serde_json::from_value(value) {
            Ok(meta) => Some(meta),
            Err(e) => {
                tracing::warn!(function_id, error = %e, "ignoring malformed meta export");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(function_id, error = %e, "meta export failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::func::Capture;
    use pretty_assertions::assert_eq;
    use rotor_sandbox::testing;
    use serde_json::json;

    fn definition(source: String) -> ChainDefinition {
        ChainDefinition::new("c1", "w1")
            .stage(StageDefinition::sandboxed(
                testing::function("f1", source),
                StageRole::Udf,
            ))
            .stage(StageDefinition::native(
                "capture",
                StageRole::Destination,
                Arc::new(Capture::new()),
            ))
    }

    #[test]
    fn cache_key_follows_sources_and_timestamp() {
        let a = definition(testing::identity());
        let b = definition(testing::identity());
        assert_eq!(a.cache_key(), b.cache_key());

        let changed = definition(testing::constant(&json!(1)));
        assert_ne!(a.cache_key(), changed.cache_key());

        let touched = definition(testing::identity()).updated_at(Utc::now());
        assert_ne!(a.cache_key(), touched.cache_key());
    }

    #[test]
    fn duplicate_and_empty_definitions_are_rejected() {
        assert!(ChainDefinition::new("c1", "w1").validate().is_err());
        let dup = definition(testing::identity()).stage(StageDefinition::sandboxed(
            testing::function("f1", testing::identity()),
            StageRole::Udf,
        ));
        assert!(matches!(dup.validate(), Err(ChainError::InvalidDefinition(_))));
    }
}
