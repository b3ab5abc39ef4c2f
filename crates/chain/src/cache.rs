//! Per-entity chain cache.
//!
//! One live chain per entity id. A chain is reused while the definition's
//! cache key is unchanged and its sandbox is alive; otherwise it is rebuilt
//! and the superseded chain is disposed after a grace period so in-flight
//! runs can finish on it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::chain::Chain;
use crate::compiler::{ChainCompiler, ChainDefinition};
use crate::error::ChainError;
use crate::runner::ChainRecovery;

/// Default delay before a superseded chain is disposed.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainCacheConfig {
    /// How long a superseded chain stays usable.
    #[serde(with = "humantime_serde")]
    pub grace_period: Duration,
}

impl Default for ChainCacheConfig {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

struct Slot {
    definition: ChainDefinition,
    chain: Arc<Chain>,
    last_used: Instant,
}

impl Slot {
    fn new(definition: ChainDefinition, chain: Arc<Chain>) -> Self {
        Self {
            definition,
            chain,
            last_used: Instant::now(),
        }
    }

    fn serves(&self, key: &str) -> bool {
        self.chain.cache_key() == key && self.chain.is_alive()
    }
}

/// Chain cache keyed by entity id.
pub struct ChainCache {
    compiler: ChainCompiler,
    config: ChainCacheConfig,
    slots: DashMap<String, Slot>,
}

impl std::fmt::Debug for ChainCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainCache")
            .field("config", &self.config)
            .field("entities", &self.slots.len())
            .finish_non_exhaustive()
    }
}

impl ChainCache {
    /// Empty cache.
    pub fn new(compiler: ChainCompiler, config: ChainCacheConfig) -> Self {
        Self {
            compiler,
            config,
            slots: DashMap::new(),
        }
    }

    /// The live chain for `definition`, building it if needed.
    ///
    /// Concurrent callers may build in parallel; the first to install wins
    /// and the losers dispose their own build.
    pub async fn get_or_build(&self, definition: &ChainDefinition) -> Result<Arc<Chain>, ChainError> {
        let key = definition.cache_key();
        if let Some(chain) = self.lookup(&definition.entity_id, &key) {
            return Ok(chain);
        }

        let built = Arc::new(self.compiler.compile(definition).await?);
        Ok(self.install(definition, built))
    }

    /// Cached chain of `entity_id`, alive or not.
    pub fn get(&self, entity_id: &str) -> Option<Arc<Chain>> {
        self.slots.get(entity_id).map(|slot| Arc::clone(&slot.chain))
    }

    /// Number of cached entities.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Drop the chain of `entity_id`. Returns whether one was cached.
    pub fn evict(&self, entity_id: &str) -> bool {
        match self.slots.remove(entity_id) {
            Some((_, slot)) => {
                self.retire(slot.chain);
                true
            }
            None => false,
        }
    }

    /// Drop chains unused for longer than `max_idle`. Returns how many.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let mut idle = Vec::new();
        self.slots.retain(|_, slot| {
            if slot.last_used.elapsed() > max_idle {
                idle.push(Arc::clone(&slot.chain));
                false
            } else {
                true
            }
        });
        let count = idle.len();
        for chain in idle {
            self.retire(chain);
        }
        if count > 0 {
            tracing::debug!(count, "evicted idle chains");
        }
        count
    }

    /// Dispose every cached chain now.
    pub fn close(&self) {
        for slot in self.slots.iter() {
            slot.chain.dispose();
        }
        self.slots.clear();
    }

    /// This cache as a recovery hook for the runner.
    pub fn recovery(self: &Arc<Self>) -> Arc<dyn ChainRecovery> {
        Arc::clone(self) as Arc<dyn ChainRecovery>
    }

    fn lookup(&self, entity_id: &str, key: &str) -> Option<Arc<Chain>> {
        let mut slot = self.slots.get_mut(entity_id)?;
        if !slot.serves(key) {
            return None;
        }
        slot.last_used = Instant::now();
        Some(Arc::clone(&slot.chain))
    }

    fn install(&self, definition: &ChainDefinition, built: Arc<Chain>) -> Arc<Chain> {
        let superseded = match self.slots.entry(definition.entity_id.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get().serves(built.cache_key()) {
                    let winner = Arc::clone(&entry.get().chain);
                    drop(entry);
                    tracing::debug!(entity_id = %definition.entity_id, "lost build race, disposing own build");
                    built.dispose();
                    return winner;
                }
                let previous = std::mem::replace(
                    entry.get_mut(),
                    Slot::new(definition.clone(), Arc::clone(&built)),
                );
                Some(previous.chain)
            }
            Entry::Vacant(entry) => {
                entry.insert(Slot::new(definition.clone(), Arc::clone(&built)));
                None
            }
        };

        if let Some(previous) = superseded {
            tracing::info!(entity_id = %definition.entity_id, "chain rebuilt");
            self.retire(previous);
        }
        built
    }

    /// Dispose `chain` once the grace period has passed.
    fn retire(&self, chain: Arc<Chain>) {
        if !chain.is_alive() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let grace = self.config.grace_period;
                handle.spawn(async move {
                    tokio::time::sleep(grace).await;
                    chain.dispose();
                    tracing::debug!(entity_id = %chain.entity_id(), "superseded chain disposed");
                });
            }
            Err(_) => chain.dispose(),
        }
    }
}

#[async_trait]
impl ChainRecovery for ChainCache {
    async fn recover(&self, stale: &Arc<Chain>) -> Result<Arc<Chain>, ChainError> {
        let definition = {
            let Some(slot) = self.slots.get(stale.entity_id()) else {
                return Err(ChainError::InvalidDefinition(format!(
                    "no chain cached for {}",
                    stale.entity_id()
                )));
            };
            if !Arc::ptr_eq(&slot.chain, stale) && slot.chain.is_alive() {
                return Ok(Arc::clone(&slot.chain));
            }
            slot.definition.clone()
        };
        self.get_or_build(&definition).await
    }
}
