mod common;

use std::time::Duration;

use bytes::Bytes;
use rttp_cache::persistence::{
    CacheError, CacheStore, Expiration, InMemoryStore, SharedStore, StoreOptions, StoreRegistry,
    open_store,
};

fn store() -> InMemoryStore {
    InMemoryStore::new(Duration::from_secs(60))
}

#[tokio::test]
async fn typed_values() {
    common::typed_values(&store(), "mem").await;
}

#[tokio::test]
async fn add_and_replace() {
    common::add_and_replace(&store(), "mem").await;
}

#[tokio::test]
async fn delete() {
    common::delete(&store(), "mem").await;
}

#[tokio::test]
async fn counters() {
    common::counters(&store(), "mem").await;
}

#[tokio::test(start_paused = true)]
async fn expiration() {
    common::expiration(&store(), "mem").await;
}

#[tokio::test]
async fn batches() {
    common::batches(&store(), "mem").await;
}

#[tokio::test]
async fn flush() {
    common::flush(&store(), "mem").await;
}

#[tokio::test(start_paused = true)]
async fn opened_through_registry_with_options() {
    let options = StoreOptions::from_json(
        r#"{ "adapter": "memory", "default_expiration_secs": 5, "cleanup_interval_secs": 0 }"#,
    )
    .unwrap();
    let store = open_store(&options).await.unwrap();
    assert_eq!(store.adapter(), "memory");

    store
        .set("k", Bytes::from_static(b"v"), Expiration::Default)
        .await
        .unwrap();
    assert_eq!(store.expires_in("k").await.unwrap(), Duration::from_secs(5));

    tokio::time::advance(Duration::from_secs(5)).await;
    assert!(store.get("k").await.unwrap_err().is_miss());
}

#[tokio::test]
async fn custom_adapters_can_be_registered() {
    let mut registry = StoreRegistry::with_builtins();
    registry
        .register("scratch", |options: StoreOptions| async move {
            Ok::<_, CacheError>(
                std::sync::Arc::new(InMemoryStore::new(options.default_expiration())) as SharedStore,
            )
        })
        .unwrap();
    assert!(registry.adapters().contains(&"scratch"));

    let options = StoreOptions {
        adapter: "scratch".to_owned(),
        default_expiration_secs: 7,
        ..StoreOptions::default()
    };
    let store = registry.open(&options).await.unwrap();
    store
        .set("k", Bytes::from_static(b"v"), Expiration::Default)
        .await
        .unwrap();
    assert_eq!(store.get("k").await.unwrap(), Bytes::from_static(b"v"));
}

#[tokio::test]
async fn stores_are_shared_between_tasks() {
    let store: SharedStore = std::sync::Arc::new(store());
    store
        .set("hits", Bytes::from_static(b"0"), Expiration::Never)
        .await
        .unwrap();

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let store = std::sync::Arc::clone(&store);
            tokio::spawn(async move { store.increment("hits", 1).await.unwrap() })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(store.increment("hits", 0).await.unwrap(), 16);
}
