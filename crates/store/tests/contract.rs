//! Behaviour every `TtlStore` implementation shares.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use rotor_ports::{TTL_MISSING, TTL_NO_EXPIRY, Ttl, TtlStore};
use rotor_store::{LayeredStore, MemoryStore, NamespacedStore};
use serde_json::json;

fn stores() -> Vec<(&'static str, Arc<dyn TtlStore>)> {
    let layered = LayeredStore::new(vec![
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryStore::new()),
    ])
    .unwrap();
    vec![
        ("memory", Arc::new(MemoryStore::new())),
        ("layered", Arc::new(layered)),
        (
            "namespaced",
            Arc::new(NamespacedStore::new("ws", Arc::new(MemoryStore::new()))),
        ),
    ]
}

#[tokio::test(start_paused = true)]
async fn contract_holds_for_every_store() {
    for (name, store) in stores() {
        assert_eq!(store.get("k").await.unwrap(), None, "{name}");
        assert_eq!(store.ttl("k").await.unwrap(), TTL_MISSING, "{name}");

        store.set("k", json!({"a": [1, 2]}), None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(json!({"a": [1, 2]})), "{name}");
        assert_eq!(store.ttl("k").await.unwrap(), TTL_NO_EXPIRY, "{name}");

        store
            .set("t", json!(1), Some("30s".parse::<Ttl>().unwrap()))
            .await
            .unwrap();
        assert_eq!(store.ttl("t").await.unwrap(), 30, "{name}");
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(store.get("t").await.unwrap(), None, "{name}");

        store.del("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None, "{name}");
    }
}
