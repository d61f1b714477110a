//! Store configuration, loadable from JSON or the process environment.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{ADAPTER_MEMORY, CacheError, CacheResult, DEFAULT_EXPIRATION};

/// Options consumed by [`open_store`](super::open_store).
///
/// ```
/// use rttp_cache::persistence::StoreOptions;
///
/// let options = StoreOptions::from_json(r#"{ "adapter": "redis", "redis": { "database": 2 } }"#).unwrap();
/// assert_eq!(options.adapter, "redis");
/// assert_eq!(options.redis.unwrap().pool_size, 5);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    /// Adapter name. Empty selects `"memory"`.
    pub adapter: String,
    /// Seconds; `0` selects one hour.
    pub default_expiration_secs: u64,
    /// Janitor interval for the in-memory store, seconds; `0` disables it.
    pub cleanup_interval_secs: u64,
    pub redis: Option<RedisConfig>,
    pub memcached: Option<MemcachedConfig>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            adapter: ADAPTER_MEMORY.to_owned(),
            default_expiration_secs: DEFAULT_EXPIRATION.as_secs(),
            cleanup_interval_secs: 60,
            redis: None,
            memcached: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
    pub password: Option<String>,
    /// Logical database selected on every pooled connection.
    pub database: Option<i64>,
    pub pool_size: usize,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_owned(),
            password: None,
            database: None,
            pool_size: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemcachedConfig {
    /// `host:port` pairs.
    pub servers: Vec<String>,
    /// SASL credentials, binary protocol only.
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for MemcachedConfig {
    fn default() -> Self {
        Self {
            servers: vec!["127.0.0.1:11211".to_owned()],
            username: None,
            password: None,
        }
    }
}

impl StoreOptions {
    pub fn from_json(json: &str) -> CacheResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads `CACHE_*`, `REDIS_*` and `MEMCACHED_*` variables over the defaults.
    ///
    /// Redis and memcached sections are only filled in when at least one of
    /// their variables is set.
    pub fn from_env() -> CacheResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> CacheResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut options = Self::default();
        if let Some(adapter) = lookup("CACHE_ADAPTER") {
            options.adapter = adapter.trim().to_owned();
        }
        if let Some(secs) = parse_var(&lookup, "CACHE_DEFAULT_EXPIRATION_SECS")? {
            options.default_expiration_secs = secs;
        }
        if let Some(secs) = parse_var(&lookup, "CACHE_CLEANUP_INTERVAL_SECS")? {
            options.cleanup_interval_secs = secs;
        }

        let redis_url = lookup("REDIS_URL");
        let redis_password = lookup("REDIS_PASSWORD");
        let redis_db = parse_var(&lookup, "REDIS_DB")?;
        let redis_pool = parse_var(&lookup, "REDIS_POOL_SIZE")?;
        if redis_url.is_some() || redis_password.is_some() || redis_db.is_some() || redis_pool.is_some() {
            let defaults = RedisConfig::default();
            options.redis = Some(RedisConfig {
                url: redis_url.unwrap_or(defaults.url),
                password: redis_password,
                database: redis_db,
                pool_size: redis_pool.unwrap_or(defaults.pool_size),
            });
        }

        let servers = lookup("MEMCACHED_SERVERS");
        let username = lookup("MEMCACHED_USERNAME");
        let password = lookup("MEMCACHED_PASSWORD");
        if servers.is_some() || username.is_some() || password.is_some() {
            let servers = match servers {
                Some(list) => list
                    .split(',')
                    .map(str::trim)
                    .filter(|server| !server.is_empty())
                    .map(str::to_owned)
                    .collect(),
                None => MemcachedConfig::default().servers,
            };
            options.memcached = Some(MemcachedConfig {
                servers,
                username,
                password,
            });
        }

        Ok(options)
    }

    pub fn default_expiration(&self) -> Duration {
        match self.default_expiration_secs {
            0 => DEFAULT_EXPIRATION,
            secs => Duration::from_secs(secs),
        }
    }

    pub fn cleanup_interval(&self) -> Option<Duration> {
        (self.cleanup_interval_secs > 0).then(|| Duration::from_secs(self.cleanup_interval_secs))
    }
}

fn parse_var<F, T>(lookup: &F, name: &str) -> CacheResult<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    lookup(name)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| CacheError::Config(format!("{name}={raw}: {e}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn defaults_are_memory_for_an_hour() {
        let options = StoreOptions::from_lookup(lookup(&[])).unwrap();
        assert_eq!(options, StoreOptions::default());
        assert_eq!(options.adapter, "memory");
        assert_eq!(options.default_expiration(), Duration::from_secs(3600));
        assert_eq!(options.cleanup_interval(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn zero_expiration_falls_back_to_an_hour() {
        let options = StoreOptions::from_json(r#"{"default_expiration_secs": 0, "cleanup_interval_secs": 0}"#)
            .unwrap();
        assert_eq!(options.default_expiration(), DEFAULT_EXPIRATION);
        assert_eq!(options.cleanup_interval(), None);
    }

    #[test]
    fn env_fills_backend_sections() {
        let options = StoreOptions::from_lookup(lookup(&[
            ("CACHE_ADAPTER", "memcachebinary"),
            ("REDIS_DB", "3"),
            ("MEMCACHED_SERVERS", "a:11211, b:11211"),
            ("MEMCACHED_USERNAME", "user"),
        ]))
        .unwrap();
        assert_eq!(options.adapter, "memcachebinary");

        let redis = options.redis.unwrap();
        assert_eq!(redis.database, Some(3));
        assert_eq!(redis.url, "redis://127.0.0.1:6379");

        let memcached = options.memcached.unwrap();
        assert_eq!(memcached.servers, vec!["a:11211", "b:11211"]);
        assert_eq!(memcached.username.as_deref(), Some("user"));
    }

    #[test]
    fn malformed_number_is_a_config_error() {
        let err = StoreOptions::from_lookup(lookup(&[("REDIS_POOL_SIZE", "many")])).unwrap_err();
        assert!(matches!(err, CacheError::Config(msg) if msg.starts_with("REDIS_POOL_SIZE")));
    }

    #[test]
    fn invalid_json_is_reported() {
        assert!(matches!(
            StoreOptions::from_json("{ nope"),
            Err(CacheError::Serialization(_))
        ));
    }
}
