//! Embedded expiring map.

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, mapref::entry::Entry as MapEntry};
use tokio::{task::JoinHandle, time::Instant};
use tracing::{debug, trace};

use super::{ADAPTER_MEMORY, CacheError, CacheResult, CacheStore, Expiration, codec};

/// Shortest period [`InMemoryStore::spawn_janitor`] will run at.
pub const MIN_JANITOR_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
struct Entry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl Entry {
    /// A TTL past the clock's range means no expiry.
    fn new(value: Bytes, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.and_then(|ttl| Instant::now().checked_add(ttl)),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-process store backed by a sharded [`DashMap`].
///
/// Expired entries are never returned. They are dropped lazily when touched and
/// in bulk by [`purge_expired`](Self::purge_expired), which the janitor task
/// started by [`spawn_janitor`](Self::spawn_janitor) calls periodically.
///
/// Conditional writes and counters lock the key's shard, so they are atomic
/// per key. [`add_many`](CacheStore::add_many) is not atomic across keys.
#[derive(Debug)]
pub struct InMemoryStore {
    entries: DashMap<String, Entry>,
    default_expiration: Duration,
}

impl InMemoryStore {
    /// A zero `default_expiration` means items written with
    /// [`Expiration::Default`] never expire.
    pub fn new(default_expiration: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            default_expiration,
        }
    }

    /// Creates a shared store and, when `cleanup_interval` is set, its janitor.
    ///
    /// Must be called from within a Tokio runtime when a janitor is requested.
    pub fn shared(default_expiration: Duration, cleanup_interval: Option<Duration>) -> Arc<Self> {
        let store = Arc::new(Self::new(default_expiration));
        if let Some(every) = cleanup_interval {
            store.spawn_janitor(every);
        }
        store
    }

    /// Spawns a task calling [`purge_expired`](Self::purge_expired) every `every`,
    /// but no more often than [`MIN_JANITOR_INTERVAL`].
    ///
    /// The task holds a weak reference and exits once the store is dropped.
    pub fn spawn_janitor(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        let every = every.max(MIN_JANITOR_INTERVAL);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                let purged = store.purge_expired();
                if purged > 0 {
                    debug!(purged, "purged expired cache entries");
                }
            }
            trace!("cache janitor stopped");
        })
    }

    /// Removes every expired entry and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut purged = 0;
        self.entries.retain(|_, entry| {
            let keep = !entry.is_expired(now);
            if !keep {
                purged += 1;
            }
            keep
        });
        purged
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn default_expiration(&self) -> Duration {
        self.default_expiration
    }

    fn entry(&self, value: Bytes, expiration: Expiration) -> Entry {
        Entry::new(value, expiration.resolve(self.default_expiration))
    }

    fn update_counter(&self, key: &str, apply: impl FnOnce(u64) -> u64) -> CacheResult<u64> {
        let now = Instant::now();
        let mut entry = match self.entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => entry,
            _ => return Err(CacheError::CacheMiss),
        };
        let next = apply(codec::parse_counter(key, &entry.value)?);
        entry.value = Bytes::from(next.to_string());
        Ok(next)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(super::DEFAULT_EXPIRATION)
    }
}

#[async_trait]
impl CacheStore for InMemoryStore {
    fn adapter(&self) -> &'static str {
        ADAPTER_MEMORY
    }

    async fn get(&self, key: &str) -> CacheResult<Bytes> {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Ok(entry.value.clone()),
            Some(_) => {}
            None => return Err(CacheError::CacheMiss),
        }
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        Err(CacheError::CacheMiss)
    }

    async fn set(&self, key: &str, value: Bytes, expiration: Expiration) -> CacheResult<()> {
        self.entries
            .insert(key.to_owned(), self.entry(value, expiration));
        Ok(())
    }

    async fn add(&self, key: &str, value: Bytes, expiration: Expiration) -> CacheResult<()> {
        let now = Instant::now();
        match self.entries.entry(key.to_owned()) {
            MapEntry::Occupied(mut occupied) => {
                if !occupied.get().is_expired(now) {
                    return Err(CacheError::NotStored);
                }
                occupied.insert(self.entry(value, expiration));
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(self.entry(value, expiration));
            }
        }
        Ok(())
    }

    async fn replace(&self, key: &str, value: Bytes, expiration: Expiration) -> CacheResult<()> {
        let now = Instant::now();
        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) => {
                *entry = self.entry(value, expiration);
                Ok(())
            }
            _ => Err(CacheError::NotStored),
        }
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let now = Instant::now();
        match self.entries.remove(key) {
            Some((_, entry)) if !entry.is_expired(now) => Ok(()),
            _ => Err(CacheError::CacheMiss),
        }
    }

    async fn increment(&self, key: &str, delta: u64) -> CacheResult<u64> {
        self.update_counter(key, |current| current.wrapping_add(delta))
    }

    async fn decrement(&self, key: &str, delta: u64) -> CacheResult<u64> {
        self.update_counter(key, |current| current.saturating_sub(delta))
    }

    async fn flush(&self) -> CacheResult<()> {
        self.entries.clear();
        Ok(())
    }

    async fn expires_in(&self, key: &str) -> CacheResult<Duration> {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => entry
                .expires_at
                .map(|at| at.saturating_duration_since(now))
                .ok_or(CacheError::NoTtl),
            _ => Err(CacheError::CacheMiss),
        }
    }
}
