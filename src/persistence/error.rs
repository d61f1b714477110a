use thiserror::Error;

/// Errors returned by every [`CacheStore`](super::CacheStore) operation.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The key is absent or its entry has expired.
    #[error("cache miss")]
    CacheMiss,

    /// A conditional write (`add`, `replace`, `add_many`) did not store the item.
    #[error("item not stored")]
    NotStored,

    #[error("operation not supported by this store")]
    NotSupported,

    #[error("key has no expiration")]
    NoTtl,

    #[error("value for key `{key}` is not a decimal unsigned integer")]
    NotNumeric { key: String },

    /// The watched value changed between read and write.
    #[error("value for key `{key}` changed concurrently")]
    Conflict { key: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unknown cache adapter `{0}`")]
    UnknownAdapter(String),

    #[error("cache adapter `{0}` is already registered")]
    AdapterExists(String),

    #[error("invalid cache configuration: {0}")]
    Config(String),

    #[error("cannot decode cached value: {0}")]
    Decode(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "redis")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[cfg(feature = "redis")]
    #[error("redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    #[cfg(feature = "memcached")]
    #[error("memcached error: {0}")]
    Memcached(memcache::MemcacheError),

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl CacheError {
    /// `true` for [`CacheError::CacheMiss`].
    pub fn is_miss(&self) -> bool {
        matches!(self, CacheError::CacheMiss)
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
