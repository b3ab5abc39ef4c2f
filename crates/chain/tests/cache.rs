//! Chain cache lifecycle.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use rotor_chain::{
    ChainCache, ChainCacheConfig, ChainCompiler, ChainDefinition, ChainRecovery, StageDefinition,
    StageRole,
};
use rotor_ports::{FetchRequest, FetchResponse, Fetcher, PortsError};
use rotor_sandbox::{HostBindings, SandboxEngine, SandboxLimits, testing};
use rotor_store::MemoryStore;

struct NoFetch;

#[async_trait]
impl Fetcher for NoFetch {
    async fn fetch(&self, _request: FetchRequest) -> Result<FetchResponse, PortsError> {
        Err(PortsError::not_implemented("fetch"))
    }
}

fn cache() -> ChainCache {
    let engine = SandboxEngine::new().unwrap();
    let bindings = HostBindings::new(Arc::new(MemoryStore::new()), Arc::new(NoFetch));
    ChainCache::new(
        ChainCompiler::new(engine, bindings, SandboxLimits::default()),
        ChainCacheConfig {
            grace_period: Duration::from_secs(30),
        },
    )
}

fn definition(hour: u32) -> ChainDefinition {
    ChainDefinition::new("c1", "w1")
        .stage(StageDefinition::sandboxed(
            testing::function("f1", testing::identity()),
            StageRole::Udf,
        ))
        .updated_at(Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap())
}

#[tokio::test]
async fn unchanged_definition_reuses_the_chain() {
    let cache = cache();

    let first = cache.get_or_build(&definition(1)).await.unwrap();
    let second = cache.get_or_build(&definition(1)).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.cache_key(), definition(1).cache_key());
    assert_eq!(cache.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn rebuild_disposes_the_old_chain_after_grace() {
    let cache = cache();
    let old = cache.get_or_build(&definition(1)).await.unwrap();

    let new = cache.get_or_build(&definition(2)).await.unwrap();
    assert!(!Arc::ptr_eq(&old, &new));
    assert!(old.is_alive(), "superseded chain must stay usable for in-flight runs");

    tokio::time::sleep(Duration::from_secs(29)).await;
    assert!(old.is_alive());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!old.is_alive());
    assert!(new.is_alive());
    assert!(Arc::ptr_eq(&cache.get("c1").unwrap(), &new));
}

#[tokio::test]
async fn dead_chain_is_rebuilt() {
    let cache = cache();
    let first = cache.get_or_build(&definition(1)).await.unwrap();
    first.dispose();

    let second = cache.get_or_build(&definition(1)).await.unwrap();

    assert!(!Arc::ptr_eq(&first, &second));
    assert!(second.is_alive());
}

#[tokio::test]
async fn recovery_prefers_an_existing_replacement() {
    let cache = cache();
    let stale = cache.get_or_build(&definition(1)).await.unwrap();
    stale.dispose();

    let replacement = cache.recover(&stale).await.unwrap();
    assert!(replacement.is_alive());

    let again = cache.recover(&stale).await.unwrap();
    assert!(Arc::ptr_eq(&replacement, &again));
}

#[tokio::test]
async fn recovery_of_unknown_entity_fails() {
    let cache = cache();
    let stale = cache.get_or_build(&definition(1)).await.unwrap();
    assert!(cache.evict("c1"));

    assert!(cache.recover(&stale).await.is_err());
    assert!(cache.is_empty());
}

#[tokio::test(start_paused = true)]
async fn idle_chains_are_evicted() {
    let cache = cache();
    let chain = cache.get_or_build(&definition(1)).await.unwrap();

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(cache.evict_idle(Duration::from_secs(60)), 0);
    assert_eq!(cache.evict_idle(Duration::from_secs(5)), 1);
    assert!(cache.is_empty());

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert!(!chain.is_alive());
}

#[tokio::test]
async fn close_disposes_everything() {
    let cache = cache();
    let chain = cache.get_or_build(&definition(1)).await.unwrap();

    cache.close();

    assert!(!chain.is_alive());
    assert!(cache.is_empty());
}
