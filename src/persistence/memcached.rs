//! memcached backend, text or binary protocol.
//!
//! The `memcache` client is blocking, so every call runs on Tokio's blocking
//! pool.

use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use bytes::Bytes;
use memcache::{Client, CommandError, MemcacheError};
use tracing::info;

use super::{
    ADAPTER_MEMCACHE, ADAPTER_MEMCACHE_BINARY, CacheError, CacheResult, CacheStore, Expiration,
    MemcachedConfig, codec,
};

/// memcached treats expirations above 30 days as absolute Unix timestamps.
const MAX_RELATIVE_EXPIRATION: u64 = 60 * 60 * 24 * 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Text,
    Binary,
}

impl Protocol {
    fn adapter(self) -> &'static str {
        match self {
            Protocol::Text => ADAPTER_MEMCACHE,
            Protocol::Binary => ADAPTER_MEMCACHE_BINARY,
        }
    }
}

/// A store backed by one or more memcached servers.
///
/// With the text protocol `add` and `replace` check for the key before
/// writing, so they are not atomic against concurrent writers.
#[derive(Clone)]
pub struct MemcachedStore {
    client: Arc<Client>,
    protocol: Protocol,
    default_expiration: Duration,
}

impl std::fmt::Debug for MemcachedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemcachedStore")
            .field("protocol", &self.protocol)
            .field("default_expiration", &self.default_expiration)
            .finish_non_exhaustive()
    }
}

impl MemcachedStore {
    /// Connects to every server in `config` and checks that they answer.
    pub async fn connect(
        config: &MemcachedConfig,
        protocol: Protocol,
        default_expiration: Duration,
    ) -> CacheResult<Self> {
        if config.servers.is_empty() {
            return Err(CacheError::Config("no memcached servers configured".to_owned()));
        }
        let urls: Vec<String> = config
            .servers
            .iter()
            .map(|server| server_url(server, protocol, config))
            .collect();

        let client = tokio::task::spawn_blocking(move || {
            let client = Client::connect(urls)?;
            client.version()?;
            Ok::<_, MemcacheError>(client)
        })
        .await?
        .map_err(CacheError::Memcached)?;

        info!(
            servers = ?config.servers,
            protocol = ?protocol,
            "connected to memcached"
        );
        Ok(Self::with_client(client, protocol, default_expiration))
    }

    pub fn with_client(client: Client, protocol: Protocol, default_expiration: Duration) -> Self {
        Self {
            client: Arc::new(client),
            protocol,
            default_expiration,
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    async fn run<T, F>(&self, op: F) -> CacheResult<Result<T, MemcacheError>>
    where
        F: FnOnce(&Client) -> Result<T, MemcacheError> + Send + 'static,
        T: Send + 'static,
    {
        let client = Arc::clone(&self.client);
        Ok(tokio::task::spawn_blocking(move || op(&client)).await?)
    }

    fn exptime(&self, expiration: Expiration) -> u32 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |since| since.as_secs());
        exptime(expiration.resolve(self.default_expiration), now)
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        match self.get(key).await {
            Ok(_) => Ok(true),
            Err(CacheError::CacheMiss) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Distinguishes a non-numeric value from other counter failures.
    async fn counter_error(&self, key: &str, err: MemcacheError) -> CacheError {
        match read_error(err) {
            CacheError::CacheMiss => CacheError::CacheMiss,
            other => match self.get(key).await {
                Ok(value) if codec::parse_counter(key, &value).is_err() => CacheError::NotNumeric {
                    key: key.to_owned(),
                },
                _ => other,
            },
        }
    }

    async fn update_counter(&self, key: &str, delta: u64, increment: bool) -> CacheResult<u64> {
        let owned = key.to_owned();
        let result = self
            .run(move |client| {
                if increment {
                    client.increment(&owned, delta)
                } else {
                    client.decrement(&owned, delta)
                }
            })
            .await?;
        match result {
            Ok(value) => Ok(value),
            Err(err) => Err(self.counter_error(key, err).await),
        }
    }
}

/// Whole seconds, rounded up; `0` means no expiry.
fn exptime(ttl: Option<Duration>, now_unix: u64) -> u32 {
    let Some(ttl) = ttl else {
        return 0;
    };
    let secs = ttl.as_secs().saturating_add(u64::from(ttl.subsec_nanos() > 0));
    let secs = if secs > MAX_RELATIVE_EXPIRATION {
        now_unix.saturating_add(secs)
    } else {
        secs
    };
    u32::try_from(secs).unwrap_or(u32::MAX)
}

fn server_url(server: &str, protocol: Protocol, config: &MemcachedConfig) -> String {
    let server = server.trim_start_matches("memcache://");
    match protocol {
        Protocol::Text => format!("memcache://{server}?protocol=ascii"),
        Protocol::Binary => match (&config.username, &config.password) {
            (Some(user), Some(password)) => format!("memcache://{user}:{password}@{server}"),
            _ => format!("memcache://{server}"),
        },
    }
}

fn read_error(err: MemcacheError) -> CacheError {
    match err {
        MemcacheError::CommandError(CommandError::KeyNotFound) => CacheError::CacheMiss,
        MemcacheError::CommandError(CommandError::KeyExists) => CacheError::NotStored,
        other => CacheError::Memcached(other),
    }
}

fn write_error(err: MemcacheError) -> CacheError {
    match err {
        MemcacheError::CommandError(CommandError::KeyNotFound | CommandError::KeyExists) => {
            CacheError::NotStored
        }
        other => CacheError::Memcached(other),
    }
}

#[async_trait]
impl CacheStore for MemcachedStore {
    fn adapter(&self) -> &'static str {
        self.protocol.adapter()
    }

    async fn get(&self, key: &str) -> CacheResult<Bytes> {
        let key = key.to_owned();
        let value = self
            .run(move |client| client.get::<Vec<u8>>(&key))
            .await?
            .map_err(read_error)?;
        value.map(Bytes::from).ok_or(CacheError::CacheMiss)
    }

    async fn set(&self, key: &str, value: Bytes, expiration: Expiration) -> CacheResult<()> {
        let key = key.to_owned();
        let exptime = self.exptime(expiration);
        self.run(move |client| client.set(&key, &value[..], exptime))
            .await?
            .map_err(write_error)
    }

    async fn add(&self, key: &str, value: Bytes, expiration: Expiration) -> CacheResult<()> {
        if self.protocol == Protocol::Text && self.exists(key).await? {
            return Err(CacheError::NotStored);
        }
        let key = key.to_owned();
        let exptime = self.exptime(expiration);
        self.run(move |client| client.add(&key, &value[..], exptime))
            .await?
            .map_err(write_error)
    }

    async fn replace(&self, key: &str, value: Bytes, expiration: Expiration) -> CacheResult<()> {
        if self.protocol == Protocol::Text && !self.exists(key).await? {
            return Err(CacheError::NotStored);
        }
        let key = key.to_owned();
        let exptime = self.exptime(expiration);
        self.run(move |client| client.replace(&key, &value[..], exptime))
            .await?
            .map_err(write_error)
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let key = key.to_owned();
        let removed = self
            .run(move |client| client.delete(&key))
            .await?
            .map_err(read_error)?;
        if removed {
            Ok(())
        } else {
            Err(CacheError::CacheMiss)
        }
    }

    async fn increment(&self, key: &str, delta: u64) -> CacheResult<u64> {
        self.update_counter(key, delta, true).await
    }

    async fn decrement(&self, key: &str, delta: u64) -> CacheResult<u64> {
        self.update_counter(key, delta, false).await
    }

    async fn flush(&self) -> CacheResult<()> {
        self.run(|client| client.flush())
            .await?
            .map_err(CacheError::Memcached)
    }

    async fn get_many(&self, keys: &[&str]) -> CacheResult<Vec<Bytes>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let owned: Vec<String> = keys.iter().map(|key| (*key).to_owned()).collect();
        let mut found = self
            .run(move |client| {
                let refs: Vec<&str> = owned.iter().map(String::as_str).collect();
                client.gets::<Vec<u8>>(&refs)
            })
            .await?
            .map_err(read_error)?;
        keys.iter()
            .map(|key| {
                found
                    .remove(*key)
                    .map(Bytes::from)
                    .ok_or(CacheError::CacheMiss)
            })
            .collect()
    }
}
