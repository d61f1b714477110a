//! Adapter name → store factory.

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use tracing::info;

use super::{
    ADAPTER_MEMORY, CacheError, CacheResult, InMemoryStore, SharedStore, StoreOptions,
};

pub type StoreFuture = Pin<Box<dyn Future<Output = CacheResult<SharedStore>> + Send>>;

/// Builds a store from the options it was opened with.
pub type StoreFactory = Arc<dyn Fn(StoreOptions) -> StoreFuture + Send + Sync>;

/// Opens stores by adapter name.
///
/// ```
/// use rttp_cache::persistence::{CacheError, InMemoryStore, SharedStore, StoreOptions, StoreRegistry};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), CacheError> {
/// let mut registry = StoreRegistry::with_builtins();
/// registry.register("scratch", |_options| async {
///     Ok::<_, CacheError>(std::sync::Arc::new(InMemoryStore::default()) as SharedStore)
/// })?;
///
/// let options = StoreOptions { adapter: "scratch".into(), ..StoreOptions::default() };
/// let store = registry.open(&options).await?;
/// assert_eq!(store.adapter(), "memory");
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct StoreRegistry {
    factories: HashMap<String, StoreFactory>,
}

impl StoreRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every adapter compiled into this build.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.insert(ADAPTER_MEMORY, |options| async move {
            let store = InMemoryStore::shared(options.default_expiration(), options.cleanup_interval());
            Ok::<_, CacheError>(store as SharedStore)
        });

        #[cfg(feature = "redis")]
        registry.insert(super::ADAPTER_REDIS, |options| async move {
            let config = options.redis.clone().unwrap_or_default();
            let store = super::RedisStore::connect(&config, options.default_expiration()).await?;
            Ok::<_, CacheError>(Arc::new(store) as SharedStore)
        });

        #[cfg(feature = "memcached")]
        {
            use super::memcached::{MemcachedStore, Protocol};

            for (name, protocol) in [
                (super::ADAPTER_MEMCACHE, Protocol::Text),
                (super::ADAPTER_MEMCACHE_BINARY, Protocol::Binary),
            ] {
                registry.insert(name, move |options| async move {
                    let config = options.memcached.clone().unwrap_or_default();
                    let store =
                        MemcachedStore::connect(&config, protocol, options.default_expiration())
                            .await?;
                    Ok::<_, CacheError>(Arc::new(store) as SharedStore)
                });
            }
        }

        registry
    }

    /// Adds an adapter. Fails with [`CacheError::AdapterExists`] if `name` is taken.
    pub fn register<F, Fut>(&mut self, name: &str, factory: F) -> CacheResult<()>
    where
        F: Fn(StoreOptions) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CacheResult<SharedStore>> + Send + 'static,
    {
        if self.factories.contains_key(name) {
            return Err(CacheError::AdapterExists(name.to_owned()));
        }
        self.insert(name, factory);
        Ok(())
    }

    fn insert<F, Fut>(&mut self, name: &str, factory: F)
    where
        F: Fn(StoreOptions) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CacheResult<SharedStore>> + Send + 'static,
    {
        let factory: StoreFactory =
            Arc::new(move |options: StoreOptions| -> StoreFuture { Box::pin(factory(options)) });
        self.factories.insert(name.to_owned(), factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered adapter names, sorted.
    pub fn adapters(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Opens the store named by `options.adapter`; an empty name selects `"memory"`.
    pub async fn open(&self, options: &StoreOptions) -> CacheResult<SharedStore> {
        let name = match options.adapter.trim() {
            "" => ADAPTER_MEMORY,
            name => name,
        };
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| CacheError::UnknownAdapter(name.to_owned()))?;

        let store = factory(options.clone()).await?;
        info!(
            adapter = name,
            default_expiration_secs = options.default_expiration().as_secs(),
            "cache store opened"
        );
        Ok(store)
    }
}

/// Opens a store with the built-in adapters.
pub async fn open_store(options: &StoreOptions) -> CacheResult<SharedStore> {
    StoreRegistry::with_builtins().open(options).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_adapter_opens_memory() {
        let options = StoreOptions {
            adapter: String::new(),
            ..StoreOptions::default()
        };
        let store = open_store(&options).await.unwrap();
        assert_eq!(store.adapter(), "memory");
    }

    #[tokio::test]
    async fn unknown_adapter_is_rejected() {
        let options = StoreOptions {
            adapter: "carrier-pigeon".to_owned(),
            ..StoreOptions::default()
        };
        assert!(matches!(
            open_store(&options).await,
            Err(CacheError::UnknownAdapter(name)) if name == "carrier-pigeon"
        ));
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut registry = StoreRegistry::with_builtins();
        let err = registry
            .register("memory", |_options| async {
                Ok::<_, CacheError>(Arc::new(InMemoryStore::default()) as SharedStore)
            })
            .unwrap_err();
        assert!(matches!(err, CacheError::AdapterExists(name) if name == "memory"));
    }

    #[test]
    fn builtins_follow_enabled_features() {
        let registry = StoreRegistry::with_builtins();
        assert!(registry.contains("memory"));
        assert_eq!(registry.contains("redis"), cfg!(feature = "redis"));
        assert_eq!(registry.contains("memcachebinary"), cfg!(feature = "memcached"));
        assert!(StoreRegistry::new().adapters().is_empty());
    }
}
