//! Runs against the server in `REDIS_URL`; skipped when it is unset.
//! The suite ends with `FLUSHDB`, so point it at a scratch database.

#![cfg(feature = "redis")]

mod common;

use std::time::Duration;

use bytes::Bytes;
use rttp_cache::persistence::{
    CacheError, CacheStore, Expiration, RedisConfig, RedisStore, StoreOptions, open_store,
};

fn config() -> Option<RedisConfig> {
    let Ok(url) = std::env::var("REDIS_URL") else {
        eprintln!("REDIS_URL not set, skipping");
        return None;
    };
    Some(RedisConfig {
        url,
        ..RedisConfig::default()
    })
}

// One test so the closing FLUSHDB cannot race another test's keys.
#[tokio::test]
async fn redis_store() {
    let Some(config) = config() else { return };
    native_counters_and_expiry(&config).await;

    let options = StoreOptions {
        adapter: "redis".to_owned(),
        redis: Some(config),
        ..StoreOptions::default()
    };
    let store = open_store(&options).await.unwrap();
    assert_eq!(store.adapter(), "redis");
    common::all(store.as_ref(), "rttp-cache-test").await;
}

async fn native_counters_and_expiry(config: &RedisConfig) {
    let store = RedisStore::connect(config, Duration::from_secs(60)).await.unwrap();

    let key = "rttp-cache-test:native";
    let _ = store.delete(key).await;
    assert_eq!(store.increment_atomic(key, 5).await.unwrap(), 5);
    assert_eq!(store.increment_atomic(key, -2).await.unwrap(), 3);
    assert_eq!(store.increment_check_set(key, 4).await.unwrap(), 7);

    assert!(matches!(store.expires_in(key).await, Err(CacheError::NoTtl)));
    store
        .set(key, Bytes::from_static(b"1"), Expiration::After(Duration::from_secs(30)))
        .await
        .unwrap();
    let ttl = store.expires_in(key).await.unwrap();
    assert!(ttl > Duration::from_secs(25) && ttl <= Duration::from_secs(30));

    assert!(matches!(
        store.expire_at("rttp-cache-test:missing", 4_102_444_800).await,
        Err(CacheError::CacheMiss)
    ));
    store.delete(key).await.unwrap();
}
