//! Runs against the servers in `MEMCACHED_SERVERS`; skipped when it is unset.
//! Both protocols are exercised and the suite ends with `flush_all`.

#![cfg(feature = "memcached")]

mod common;

use rttp_cache::persistence::{StoreOptions, open_store};

fn options(adapter: &str) -> Option<StoreOptions> {
    if std::env::var("MEMCACHED_SERVERS").is_err() {
        eprintln!("MEMCACHED_SERVERS not set, skipping");
        return None;
    }
    let mut options = StoreOptions::from_env().unwrap();
    options.adapter = adapter.to_owned();
    Some(options)
}

// Sequential: each run ends by flushing the servers.
#[tokio::test]
async fn memcached_store() {
    for (adapter, prefix) in [("memcache", "rttp-cache-text"), ("memcachebinary", "rttp-cache-binary")] {
        let Some(options) = options(adapter) else { return };
        let store = open_store(&options).await.unwrap();
        assert_eq!(store.adapter(), adapter);
        common::all(store.as_ref(), prefix).await;
    }
}
