use crate::db::redis::RedisPool;
use async_trait::async_trait;
use bb8_redis::redis::AsyncCommands;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::Instrument;

/// Key-value cache with per-entry expiry. Advisory only: never the source of truth.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> anyhow::Result<()>;
    async fn delete(&self, key: &str) -> anyhow::Result<()>;
    async fn exists(&self, key: &str) -> anyhow::Result<bool>;
}

pub struct RedisCache {
    pool: RedisPool,
    command_timeout: Duration,
}

impl RedisCache {
    pub fn new(pool: RedisPool, command_timeout: Duration) -> Self {
        Self {
            pool,
            command_timeout,
        }
    }

    async fn with_timeout<T, F>(&self, op: &'static str, fut: F) -> anyhow::Result<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        match tokio::time::timeout(self.command_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!(
                "redis {} timed out after {:?}",
                op,
                self.command_timeout
            )),
        }
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let span = tracing::debug_span!("redis_get", key);
        self.with_timeout("GET", async {
            let mut conn = self.pool.get().await?;
            let value: Option<String> = conn.get(key).await?;
            Ok(value)
        }
        .instrument(span))
        .await
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> anyhow::Result<()> {
        let span = tracing::debug_span!("redis_set", key, ttl_seconds);
        if ttl_seconds == 0 {
            return self.delete(key).await;
        }
        self.with_timeout("SETEX", async {
            let mut conn = self.pool.get().await?;
            conn.set_ex::<_, _, ()>(key, value, ttl_seconds).await?;
            Ok(())
        }
        .instrument(span))
        .await
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        let span = tracing::debug_span!("redis_del", key);
        self.with_timeout("DEL", async {
            let mut conn = self.pool.get().await?;
            conn.del::<_, ()>(key).await?;
            Ok(())
        }
        .instrument(span))
        .await
    }

    async fn exists(&self, key: &str) -> anyhow::Result<bool> {
        let span = tracing::debug_span!("redis_exists", key);
        self.with_timeout("EXISTS", async {
            let mut conn = self.pool.get().await?;
            let exists: bool = conn.exists(key).await?;
            Ok(exists)
        }
        .instrument(span))
        .await
    }
}

/// Writes between sweeps of expired entries.
const PURGE_EVERY_WRITES: usize = 256;

/// Process-local cache used when Redis is not configured.
///
/// Expired entries are dropped when read, and swept on every
/// `purge_interval`-th write so keys that are never read again do not
/// accumulate.
#[derive(Debug)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
    writes: AtomicUsize,
    purge_interval: usize,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::with_purge_interval(PURGE_EVERY_WRITES)
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_purge_interval(purge_interval: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            writes: AtomicUsize::new(0),
            purge_interval: purge_interval.max(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, (String, Instant)>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Entries held, expired or not.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live_value(&self, key: &str) -> Option<String> {
        let mut entries = self.lock();
        match entries.get(key) {
            Some((value, expires)) if *expires > Instant::now() => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Drops every expired entry; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, (_, expires)| *expires > now);
        before - entries.len()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.live_value(key))
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> anyhow::Result<()> {
        {
            let mut entries = self.lock();
            if ttl_seconds == 0 {
                entries.remove(key);
            } else {
                let expires = Instant::now() + Duration::from_secs(ttl_seconds);
                entries.insert(key.to_string(), (value.to_string(), expires));
            }
        }

        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % self.purge_interval == 0 {
            let purged = self.purge_expired();
            if purged > 0 {
                tracing::debug!(purged, "Purged expired cache entries");
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.lock().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.live_value(key).is_some())
    }
}
