//! Behaviour every `CacheStore` backend must share.
//!
//! Each check namespaces its keys with `prefix` so suites can share a server.
//! [`flush`] wipes the whole store and should run last.

#![allow(dead_code)]

use std::time::Duration;

use bytes::Bytes;
use rttp_cache::persistence::{CacheError, CacheStore, CacheStoreExt, Expiration};
use serde::{Deserialize, Serialize};

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Profile {
    name: String,
    visits: u32,
}

fn key(prefix: &str, name: &str) -> String {
    format!("{prefix}:{name}")
}

fn minute() -> Expiration {
    Expiration::After(Duration::from_secs(60))
}

pub async fn typed_values(store: &dyn CacheStore, prefix: &str) {
    let int = key(prefix, "int");
    store.set_value(&int, &42u64, minute()).await.unwrap();
    assert_eq!(store.get_value::<u64>(&int).await.unwrap(), 42);

    let text = key(prefix, "text");
    store.set_value(&text, "hello", minute()).await.unwrap();
    assert_eq!(store.get_value::<String>(&text).await.unwrap(), "hello");

    let profile = key(prefix, "profile");
    let alice = Profile {
        name: "alice".to_owned(),
        visits: 3,
    };
    store.set_value(&profile, &alice, minute()).await.unwrap();
    assert_eq!(store.get_value::<Profile>(&profile).await.unwrap(), alice);

    assert!(matches!(
        store.get_value::<u64>(&key(prefix, "absent")).await,
        Err(CacheError::CacheMiss)
    ));
}

pub async fn add_and_replace(store: &dyn CacheStore, prefix: &str) {
    let k = key(prefix, "conditional");
    let _ = store.delete(&k).await;

    assert!(matches!(
        store.replace(&k, Bytes::from_static(b"x"), minute()).await,
        Err(CacheError::NotStored)
    ));
    assert!(store.get(&k).await.unwrap_err().is_miss());

    store.add(&k, Bytes::from_static(b"first"), minute()).await.unwrap();
    assert!(matches!(
        store.add(&k, Bytes::from_static(b"second"), minute()).await,
        Err(CacheError::NotStored)
    ));
    assert_eq!(store.get(&k).await.unwrap(), Bytes::from_static(b"first"));

    store.replace(&k, Bytes::from_static(b"third"), minute()).await.unwrap();
    assert_eq!(store.get(&k).await.unwrap(), Bytes::from_static(b"third"));
}

pub async fn delete(store: &dyn CacheStore, prefix: &str) {
    let k = key(prefix, "doomed");
    assert!(matches!(store.delete(&k).await, Err(CacheError::CacheMiss)));

    store.set(&k, Bytes::from_static(b"v"), minute()).await.unwrap();
    store.delete(&k).await.unwrap();
    assert!(store.get(&k).await.unwrap_err().is_miss());
}

pub async fn counters(store: &dyn CacheStore, prefix: &str) {
    let k = key(prefix, "counter");
    assert!(store.increment(&k, 1).await.unwrap_err().is_miss());

    store.set_value(&k, &10u64, minute()).await.unwrap();
    assert_eq!(store.increment(&k, 50).await.unwrap(), 60);
    assert_eq!(store.decrement(&k, 50).await.unwrap(), 10);
    assert_eq!(store.increment(&k, u64::MAX - 5).await.unwrap(), 4);
    assert_eq!(store.decrement(&k, 25).await.unwrap(), 0);
    assert_eq!(store.get_value::<u64>(&k).await.unwrap(), 0);

    let text = key(prefix, "not-a-number");
    store.set(&text, Bytes::from_static(b"abc"), minute()).await.unwrap();
    assert!(matches!(
        store.increment(&text, 1).await,
        Err(CacheError::NotNumeric { .. })
    ));
}

/// Sleeps past a one second expiry; memcached has whole-second granularity.
pub async fn expiration(store: &dyn CacheStore, prefix: &str) {
    let short = key(prefix, "short-lived");
    let forever = key(prefix, "forever");
    store
        .set(&short, Bytes::from_static(b"v"), Expiration::After(Duration::from_secs(1)))
        .await
        .unwrap();
    store.set(&forever, Bytes::from_static(b"v"), Expiration::Never).await.unwrap();

    tokio::time::sleep(Duration::from_millis(2_100)).await;

    assert!(store.get(&short).await.unwrap_err().is_miss());
    assert_eq!(store.get(&forever).await.unwrap(), Bytes::from_static(b"v"));
    store
        .add(&short, Bytes::from_static(b"again"), minute())
        .await
        .unwrap();

    let distant = key(prefix, "distant");
    store
        .set(&distant, Bytes::from_static(b"v"), Expiration::After(Duration::MAX))
        .await
        .unwrap();
    assert_eq!(store.get(&distant).await.unwrap(), Bytes::from_static(b"v"));
}

pub async fn batches(store: &dyn CacheStore, prefix: &str) {
    let a = key(prefix, "batch-a");
    let b = key(prefix, "batch-b");
    let c = key(prefix, "batch-c");
    for k in [&a, &b, &c] {
        let _ = store.delete(k).await;
    }

    store
        .add_many(
            &[(a.as_str(), Bytes::from_static(b"1")), (b.as_str(), Bytes::from_static(b"2"))],
            minute(),
        )
        .await
        .unwrap();
    assert_eq!(
        store.get_many(&[b.as_str(), a.as_str()]).await.unwrap(),
        vec![Bytes::from_static(b"2"), Bytes::from_static(b"1")]
    );
    assert!(store.get_many(&[]).await.unwrap().is_empty());
    assert!(store
        .get_many(&[a.as_str(), c.as_str()])
        .await
        .unwrap_err()
        .is_miss());

    assert!(matches!(
        store
            .add_many(
                &[(c.as_str(), Bytes::from_static(b"3")), (a.as_str(), Bytes::from_static(b"x"))],
                minute(),
            )
            .await,
        Err(CacheError::NotStored)
    ));
    assert!(store.get(&c).await.unwrap_err().is_miss());
    assert_eq!(store.get(&a).await.unwrap(), Bytes::from_static(b"1"));

    store.add_many(&[], minute()).await.unwrap();
    assert!(matches!(
        store
            .add_many(
                &[(c.as_str(), Bytes::from_static(b"1")), (c.as_str(), Bytes::from_static(b"2"))],
                minute(),
            )
            .await,
        Err(CacheError::InvalidArgument(_))
    ));
    assert!(store.get(&c).await.unwrap_err().is_miss());
}

pub async fn flush(store: &dyn CacheStore, prefix: &str) {
    let k = key(prefix, "flushed");
    store.set(&k, Bytes::from_static(b"v"), Expiration::Never).await.unwrap();
    store.flush().await.unwrap();
    assert!(store.get(&k).await.unwrap_err().is_miss());
}

pub async fn all(store: &dyn CacheStore, prefix: &str) {
    typed_values(store, prefix).await;
    add_and_replace(store, prefix).await;
    delete(store, prefix).await;
    counters(store, prefix).await;
    expiration(store, prefix).await;
    batches(store, prefix).await;
    flush(store, prefix).await;
}
