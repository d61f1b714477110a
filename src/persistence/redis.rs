//! Redis backend on a `deadpool-redis` connection pool.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use deadpool_redis::{Connection, Manager, Pool};
use redis::IntoConnectionInfo;
use tracing::{debug, info};

use super::{
    ADAPTER_REDIS, CacheError, CacheResult, CacheStore, Expiration, RedisConfig, codec,
};

/// Sets every key in `KEYS` to the matching `ARGV` value, or none of them.
/// `ARGV[1]` is the expiry in milliseconds, `0` for none.
const ADD_MANY_SCRIPT: &str = r#"
for i, key in ipairs(KEYS) do
    if redis.call('EXISTS', key) == 1 then
        return 0
    end
end
local ttl = tonumber(ARGV[1])
for i, key in ipairs(KEYS) do
    if ttl > 0 then
        redis.call('SET', key, ARGV[i + 1], 'PX', ttl)
    else
        redis.call('SET', key, ARGV[i + 1])
    end
end
return 1
"#;

/// Longest `PX` sent. Redis rejects expiries whose absolute time overflows a
/// signed 64-bit millisecond clock.
const MAX_PX_MILLIS: u64 = (i64::MAX / 2) as u64;

/// Milliseconds for `PX`, at least one. Longer TTLs are stored without expiry.
fn px_millis(ttl: Duration) -> Option<u64> {
    u64::try_from(ttl.as_millis())
        .ok()
        .filter(|millis| *millis <= MAX_PX_MILLIS)
        .map(|millis| millis.max(1))
}

/// A store backed by one Redis logical database.
///
/// Counters are read and rewritten client side so that `increment` wraps at
/// `u64::MAX` and `decrement` floors at zero, matching the other backends.
/// Use [`increment_atomic`](Self::increment_atomic) or
/// [`increment_check_set`](Self::increment_check_set) when concurrent writers
/// share a counter.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
    default_expiration: Duration,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("pool", &self.pool.status())
            .field("default_expiration", &self.default_expiration)
            .finish()
    }
}

impl RedisStore {
    /// Builds a pool from `config` and checks one connection out to fail fast on
    /// an unreachable server.
    pub async fn connect(config: &RedisConfig, default_expiration: Duration) -> CacheResult<Self> {
        let mut info = config.url.as_str().into_connection_info()?;
        if let Some(password) = &config.password {
            info.redis.password = Some(password.clone());
        }
        if let Some(database) = config.database {
            info.redis.db = database;
        }

        let manager = Manager::new(info)?;
        let pool = Pool::builder(manager)
            .max_size(config.pool_size.max(1))
            .build()
            .map_err(|e| CacheError::Config(format!("redis pool: {e}")))?;

        let store = Self::with_pool(pool, default_expiration);
        drop(store.connection().await?);
        info!(
            database = config.database.unwrap_or(0),
            pool_size = config.pool_size,
            "connected to redis"
        );
        Ok(store)
    }

    /// Wraps an externally built pool.
    pub fn with_pool(pool: Pool, default_expiration: Duration) -> Self {
        Self {
            pool,
            default_expiration,
        }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    async fn connection(&self) -> CacheResult<Connection> {
        Ok(self.pool.get().await?)
    }

    fn ttl_millis(&self, expiration: Expiration) -> Option<u64> {
        expiration
            .resolve(self.default_expiration)
            .and_then(px_millis)
    }

    /// `SET key value [NX|XX] [PX ms]`, returning whether the value was written.
    async fn write(
        &self,
        key: &str,
        value: &[u8],
        expiration: Expiration,
        condition: Option<&str>,
    ) -> CacheResult<bool> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(condition) = condition {
            cmd.arg(condition);
        }
        if let Some(millis) = self.ttl_millis(expiration) {
            cmd.arg("PX").arg(millis);
        }

        let mut conn = self.connection().await?;
        let reply: Option<String> = cmd.query_async(&mut conn).await?;
        Ok(reply.is_some())
    }

    async fn update_counter(
        &self,
        key: &str,
        apply: impl FnOnce(u64) -> u64 + Send,
    ) -> CacheResult<u64> {
        let mut conn = self.connection().await?;
        let current: Option<Vec<u8>> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        let current = current.ok_or(CacheError::CacheMiss)?;
        let next = apply(codec::parse_counter(key, &current)?);

        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(next)
            .arg("XX")
            .arg("KEEPTTL")
            .query_async(&mut conn)
            .await?;
        match reply {
            Some(_) => Ok(next),
            None => Err(CacheError::CacheMiss),
        }
    }

    /// Increments under `WATCH`, failing with [`CacheError::Conflict`] if the
    /// value changed between the read and the write.
    pub async fn increment_check_set(&self, key: &str, delta: u64) -> CacheResult<u64> {
        let mut conn = self.connection().await?;
        let _: () = redis::cmd("WATCH").arg(key).query_async(&mut conn).await?;

        let current: Option<Vec<u8>> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        let parsed = current
            .ok_or(CacheError::CacheMiss)
            .and_then(|bytes| codec::parse_counter(key, &bytes));
        let current = match parsed {
            Ok(value) => value,
            Err(err) => {
                let _: () = redis::cmd("UNWATCH").query_async(&mut conn).await?;
                return Err(err);
            }
        };
        let next = current.wrapping_add(delta);

        let committed: Option<()> = redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(key)
            .arg(next)
            .arg("XX")
            .arg("KEEPTTL")
            .ignore()
            .query_async(&mut conn)
            .await?;
        match committed {
            Some(()) => Ok(next),
            None => {
                debug!(key, "watched counter changed, transaction aborted");
                Err(CacheError::Conflict {
                    key: key.to_owned(),
                })
            }
        }
    }

    /// `INCRBY`: atomic on the server, creates the key when missing, and fails
    /// instead of wrapping on overflow.
    pub async fn increment_atomic(&self, key: &str, delta: i64) -> CacheResult<i64> {
        let mut conn = self.connection().await?;
        Ok(redis::cmd("INCRBY")
            .arg(key)
            .arg(delta)
            .query_async(&mut conn)
            .await?)
    }

    /// Sets an absolute expiry as a Unix timestamp in seconds.
    pub async fn expire_at(&self, key: &str, unix_secs: i64) -> CacheResult<()> {
        let mut conn = self.connection().await?;
        let updated: i64 = redis::cmd("EXPIREAT")
            .arg(key)
            .arg(unix_secs)
            .query_async(&mut conn)
            .await?;
        if updated == 1 {
            Ok(())
        } else {
            Err(CacheError::CacheMiss)
        }
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    fn adapter(&self) -> &'static str {
        ADAPTER_REDIS
    }

    async fn get(&self, key: &str) -> CacheResult<Bytes> {
        let mut conn = self.connection().await?;
        let value: Option<Vec<u8>> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        value.map(Bytes::from).ok_or(CacheError::CacheMiss)
    }

    async fn set(&self, key: &str, value: Bytes, expiration: Expiration) -> CacheResult<()> {
        self.write(key, &value, expiration, None).await?;
        Ok(())
    }

    async fn add(&self, key: &str, value: Bytes, expiration: Expiration) -> CacheResult<()> {
        if self.write(key, &value, expiration, Some("NX")).await? {
            Ok(())
        } else {
            Err(CacheError::NotStored)
        }
    }

    async fn replace(&self, key: &str, value: Bytes, expiration: Expiration) -> CacheResult<()> {
        if self.write(key, &value, expiration, Some("XX")).await? {
            Ok(())
        } else {
            Err(CacheError::NotStored)
        }
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.connection().await?;
        let removed: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        if removed == 0 {
            return Err(CacheError::CacheMiss);
        }
        Ok(())
    }

    async fn increment(&self, key: &str, delta: u64) -> CacheResult<u64> {
        self.update_counter(key, |current| current.wrapping_add(delta))
            .await
    }

    async fn decrement(&self, key: &str, delta: u64) -> CacheResult<u64> {
        self.update_counter(key, |current| current.saturating_sub(delta))
            .await
    }

    async fn flush(&self) -> CacheResult<()> {
        let mut conn = self.connection().await?;
        let _: () = redis::cmd("FLUSHDB").query_async(&mut conn).await?;
        Ok(())
    }

    async fn get_many(&self, keys: &[&str]) -> CacheResult<Vec<Bytes>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.connection().await?;
        let values: Vec<Option<Vec<u8>>> = redis::cmd("MGET").arg(keys).query_async(&mut conn).await?;
        values
            .into_iter()
            .map(|value| value.map(Bytes::from).ok_or(CacheError::CacheMiss))
            .collect()
    }

    async fn add_many(&self, entries: &[(&str, Bytes)], expiration: Expiration) -> CacheResult<()> {
        super::ensure_distinct_keys(entries)?;
        if entries.is_empty() {
            return Ok(());
        }
        let script = redis::Script::new(ADD_MANY_SCRIPT);
        let mut invocation = script.prepare_invoke();
        invocation.arg(self.ttl_millis(expiration).unwrap_or(0));
        for (key, value) in entries {
            invocation.key(*key).arg(&value[..]);
        }

        let mut conn = self.connection().await?;
        let stored: i64 = invocation.invoke_async(&mut conn).await?;
        if stored == 1 {
            Ok(())
        } else {
            Err(CacheError::NotStored)
        }
    }

    async fn expires_in(&self, key: &str) -> CacheResult<Duration> {
        let mut conn = self.connection().await?;
        let millis: i64 = redis::cmd("PTTL").arg(key).query_async(&mut conn).await?;
        match millis {
            -2 => Err(CacheError::CacheMiss),
            -1 => Err(CacheError::NoTtl),
            millis => Ok(Duration::from_millis(millis.max(0).unsigned_abs())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn px_is_at_least_one_millisecond() {
        assert_eq!(px_millis(Duration::from_micros(10)), Some(1));
        assert_eq!(px_millis(Duration::from_secs(2)), Some(2_000));
    }

    #[test]
    fn unrepresentable_ttls_mean_no_expiry() {
        assert_eq!(px_millis(Duration::from_millis(MAX_PX_MILLIS)), Some(MAX_PX_MILLIS));
        assert_eq!(px_millis(Duration::from_millis(MAX_PX_MILLIS + 1)), None);
        assert_eq!(px_millis(Duration::MAX), None);
    }
}
