//! Pluggable key/value stores behind a single async [`CacheStore`] trait.
//!
//! | Adapter            | Type                | Feature     |
//! |--------------------|---------------------|-------------|
//! | `"memory"`         | [`InMemoryStore`]   | always      |
//! | `"redis"`          | `RedisStore`        | `redis`     |
//! | `"memcache"`       | `MemcachedStore`    | `memcached` |
//! | `"memcachebinary"` | `MemcachedStore`    | `memcached` |
//!
//! Stores are normally opened through [`open_store`] from a [`StoreOptions`]
//! value and shared as a [`SharedStore`].
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use rttp_cache::persistence::{CacheStoreExt, Expiration, StoreOptions, open_store};
//!
//! # async fn demo() -> Result<(), rttp_cache::persistence::CacheError> {
//! let store = open_store(&StoreOptions::default()).await?;
//! store.set_value("visits", &10u64, Expiration::After(Duration::from_secs(60))).await?;
//! assert_eq!(store.increment("visits", 1).await?, 11);
//! # Ok(())
//! # }
//! ```

use std::{collections::HashSet, future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};

pub mod codec;
mod error;
pub mod memory;
#[cfg(feature = "memcached")]
pub mod memcached;
pub mod options;
#[cfg(feature = "redis")]
pub mod redis;
pub mod registry;

pub use error::{CacheError, CacheResult};
pub use memory::InMemoryStore;
#[cfg(feature = "memcached")]
pub use self::memcached::MemcachedStore;
pub use options::{MemcachedConfig, RedisConfig, StoreOptions};
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;
pub use registry::{StoreFactory, StoreRegistry, open_store};

pub const ADAPTER_MEMORY: &str = "memory";
pub const ADAPTER_REDIS: &str = "redis";
pub const ADAPTER_MEMCACHE: &str = "memcache";
pub const ADAPTER_MEMCACHE_BINARY: &str = "memcachebinary";

/// Expiration applied when a store is opened without an explicit default.
pub const DEFAULT_EXPIRATION: Duration = Duration::from_secs(60 * 60);

/// A store shared between handlers, middleware and background tasks.
pub type SharedStore = Arc<dyn CacheStore>;

/// How long a written item lives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Expiration {
    /// The store's default expiration.
    #[default]
    Default,
    /// The item never expires.
    Never,
    /// The item expires after the given duration.
    After(Duration),
}

impl Expiration {
    /// Resolves against a store default. `None` means "no expiry".
    pub fn resolve(self, default: Duration) -> Option<Duration> {
        let ttl = match self {
            Expiration::Default => default,
            Expiration::Never => return None,
            Expiration::After(ttl) => ttl,
        };
        (!ttl.is_zero()).then_some(ttl)
    }
}

impl From<Duration> for Expiration {
    fn from(ttl: Duration) -> Self {
        if ttl.is_zero() {
            Expiration::Default
        } else {
            Expiration::After(ttl)
        }
    }
}

/// A key/value client facade.
///
/// Values are opaque bytes. Counters (`increment`/`decrement`) operate on
/// values holding a decimal unsigned integer; `increment` wraps at `u64::MAX`
/// and `decrement` stops at zero. Expired items are indistinguishable from
/// missing ones.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Adapter name this store was opened with, e.g. `"memory"`.
    fn adapter(&self) -> &'static str;

    async fn get(&self, key: &str) -> CacheResult<Bytes>;

    /// Stores `value` unconditionally.
    async fn set(&self, key: &str, value: Bytes, expiration: Expiration) -> CacheResult<()>;

    /// Stores `value` only if `key` holds no live item; otherwise [`CacheError::NotStored`].
    async fn add(&self, key: &str, value: Bytes, expiration: Expiration) -> CacheResult<()>;

    /// Stores `value` only if `key` holds a live item; otherwise [`CacheError::NotStored`].
    async fn replace(&self, key: &str, value: Bytes, expiration: Expiration) -> CacheResult<()>;

    async fn delete(&self, key: &str) -> CacheResult<()>;

    async fn increment(&self, key: &str, delta: u64) -> CacheResult<u64>;

    async fn decrement(&self, key: &str, delta: u64) -> CacheResult<u64>;

    /// Removes every item in the store's namespace.
    async fn flush(&self) -> CacheResult<()>;

    /// Values for `keys`, in order. Fails with [`CacheError::CacheMiss`] if any key is absent.
    async fn get_many(&self, keys: &[&str]) -> CacheResult<Vec<Bytes>> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get(key).await?);
        }
        Ok(values)
    }

    /// Adds every entry only if none of the keys holds a live item.
    /// A batch naming the same key twice fails with
    /// [`CacheError::InvalidArgument`] before anything is written.
    ///
    /// The default implementation checks then adds key by key, so a concurrent
    /// writer can still slip in between; backends with a native atomic form
    /// override it.
    async fn add_many(&self, entries: &[(&str, Bytes)], expiration: Expiration) -> CacheResult<()> {
        ensure_distinct_keys(entries)?;
        for (key, _) in entries {
            match self.get(key).await {
                Ok(_) => return Err(CacheError::NotStored),
                Err(CacheError::CacheMiss) => {}
                Err(err) => return Err(err),
            }
        }
        for (key, value) in entries {
            self.add(key, value.clone(), expiration).await?;
        }
        Ok(())
    }

    /// Remaining time to live.
    async fn expires_in(&self, _key: &str) -> CacheResult<Duration> {
        Err(CacheError::NotSupported)
    }
}

pub(crate) fn ensure_distinct_keys(entries: &[(&str, Bytes)]) -> CacheResult<()> {
    let mut seen = HashSet::with_capacity(entries.len());
    match entries.iter().find(|(key, _)| !seen.insert(*key)) {
        Some((key, _)) => Err(CacheError::InvalidArgument(format!(
            "key `{key}` appears more than once in the batch"
        ))),
        None => Ok(()),
    }
}

/// JSON-typed convenience layer over any [`CacheStore`].
pub trait CacheStoreExt: CacheStore {
    fn get_value<T>(&self, key: &str) -> impl Future<Output = CacheResult<T>> + Send
    where
        T: DeserializeOwned + Send;

    fn set_value<T>(
        &self,
        key: &str,
        value: &T,
        expiration: Expiration,
    ) -> impl Future<Output = CacheResult<()>> + Send
    where
        T: Serialize + ?Sized;

    fn add_value<T>(
        &self,
        key: &str,
        value: &T,
        expiration: Expiration,
    ) -> impl Future<Output = CacheResult<()>> + Send
    where
        T: Serialize + ?Sized;

    fn replace_value<T>(
        &self,
        key: &str,
        value: &T,
        expiration: Expiration,
    ) -> impl Future<Output = CacheResult<()>> + Send
    where
        T: Serialize + ?Sized;

    fn get_values<T>(&self, keys: &[&str]) -> impl Future<Output = CacheResult<Vec<T>>> + Send
    where
        T: DeserializeOwned + Send;
}

impl<S> CacheStoreExt for S
where
    S: CacheStore + ?Sized,
{
    fn get_value<T>(&self, key: &str) -> impl Future<Output = CacheResult<T>> + Send
    where
        T: DeserializeOwned + Send,
    {
        async move {
            let bytes = self.get(key).await?;
            codec::decode(&bytes)
        }
    }

    fn set_value<T>(
        &self,
        key: &str,
        value: &T,
        expiration: Expiration,
    ) -> impl Future<Output = CacheResult<()>> + Send
    where
        T: Serialize + ?Sized,
    {
        let encoded = codec::encode(value);
        async move { self.set(key, encoded?, expiration).await }
    }

    fn add_value<T>(
        &self,
        key: &str,
        value: &T,
        expiration: Expiration,
    ) -> impl Future<Output = CacheResult<()>> + Send
    where
        T: Serialize + ?Sized,
    {
        let encoded = codec::encode(value);
        async move { self.add(key, encoded?, expiration).await }
    }

    fn replace_value<T>(
        &self,
        key: &str,
        value: &T,
        expiration: Expiration,
    ) -> impl Future<Output = CacheResult<()>> + Send
    where
        T: Serialize + ?Sized,
    {
        let encoded = codec::encode(value);
        async move { self.replace(key, encoded?, expiration).await }
    }

    fn get_values<T>(&self, keys: &[&str]) -> impl Future<Output = CacheResult<Vec<T>>> + Send
    where
        T: DeserializeOwned + Send,
    {
        async move {
            self.get_many(keys)
                .await?
                .iter()
                .map(|bytes| codec::decode(bytes))
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiration_resolution() {
        let default = Duration::from_secs(30);
        assert_eq!(Expiration::Default.resolve(default), Some(default));
        assert_eq!(Expiration::Never.resolve(default), None);
        assert_eq!(
            Expiration::After(Duration::from_millis(5)).resolve(default),
            Some(Duration::from_millis(5))
        );
        assert_eq!(Expiration::Default.resolve(Duration::ZERO), None);
    }

    #[test]
    fn zero_duration_means_store_default() {
        assert_eq!(Expiration::from(Duration::ZERO), Expiration::Default);
        assert_eq!(
            Expiration::from(Duration::from_secs(1)),
            Expiration::After(Duration::from_secs(1))
        );
    }

    #[test]
    fn batches_must_name_each_key_once() {
        let one = Bytes::from_static(b"1");
        assert!(ensure_distinct_keys(&[]).is_ok());
        assert!(ensure_distinct_keys(&[("a", one.clone()), ("b", one.clone())]).is_ok());
        assert!(matches!(
            ensure_distinct_keys(&[("a", one.clone()), ("b", one.clone()), ("a", one)]),
            Err(CacheError::InvalidArgument(msg)) if msg.contains("`a`")
        ));
    }
}
