//! Typed cache operations over the Redis pool

use crate::cache::connection::LinkState;
use crate::cache::{CacheError, CacheResult, RedisPool};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Point-in-time cache health and traffic counters
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub enabled: bool,
    pub link: Option<LinkState>,
    pub hits: u64,
    pub misses: u64,
}

/// JSON cache facade used by the cached repositories and the
/// payment observability layer.
///
/// The service runs without Redis (`CacheManager::disabled`): every read
/// is a miss and every write a no-op, mirroring how the rest of the stack
/// treats the cache as optional. The `*_quiet` variants implement the
/// never-fail policy: they log at warning and degrade instead of
/// surfacing the error. Hit/miss counters are shared across clones and
/// surface through `stats()`.
#[derive(Clone)]
pub struct CacheManager {
    pool: Option<RedisPool>,
    default_ttl: Duration,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl CacheManager {
    pub fn new(pool: RedisPool, default_ttl: Duration) -> Self {
        Self {
            pool: Some(pool),
            default_ttl,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// A cache that never hits; used when Redis is not configured
    pub fn disabled() -> Self {
        Self {
            pool: None,
            default_ttl: Duration::from_secs(300),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.pool.is_some()
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Get and deserialize a value
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        let Some(pool) = &self.pool else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };

        let mut conn = pool.get().await?;
        match conn.get(key).await? {
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes)
                    .map_err(|e| CacheError::DeserializationError(e.to_string()))?;
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(value))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    /// Serialize and store a value with TTL
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> CacheResult<()> {
        let Some(pool) = &self.pool else {
            return Ok(());
        };

        let bytes = serde_json::to_vec(value)
            .map_err(|e| CacheError::SerializationError(e.to_string()))?;
        let mut conn = pool.get().await?;
        conn.setex(key, ttl.as_secs().max(1), &bytes).await
    }

    /// Delete a single key
    pub async fn delete(&self, key: &str) -> CacheResult<bool> {
        let Some(pool) = &self.pool else {
            return Ok(false);
        };

        let mut conn = pool.get().await?;
        conn.del(key).await
    }

    /// Atomically increment a counter
    pub async fn incr(&self, key: &str) -> CacheResult<i64> {
        let Some(pool) = &self.pool else {
            return Err(CacheError::OperationError(
                "Cache is disabled".to_string(),
            ));
        };

        let mut conn = pool.get().await?;
        conn.incr(key).await
    }

    /// Delete every key under a prefix via cursor SCAN
    pub async fn invalidate_prefix(&self, prefix: &str) -> CacheResult<u64> {
        let Some(pool) = &self.pool else {
            return Ok(0);
        };

        let mut conn = pool.get().await?;
        let pattern = format!("{}*", prefix);
        let mut cursor = 0u64;
        let mut removed = 0u64;

        loop {
            let (next, keys) = conn.scan_match(cursor, &pattern, 100).await?;
            removed += conn.del_many(&keys).await? as u64;
            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        debug!("Cache invalidation: prefix={}, removed={}", prefix, removed);
        Ok(removed)
    }

    /// Never-fail read: a cache error is a miss
    pub async fn get_quiet<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.get(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!("Cache read failed, falling through: key={}, error={}", key, e);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Never-fail write
    pub async fn set_quiet<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        if let Err(e) = self.set(key, value, ttl).await {
            warn!("Cache write failed: key={}, error={}", key, e);
        }
    }

    /// Never-fail delete; returns false when the delete did not happen
    pub async fn delete_quiet(&self, key: &str) -> bool {
        match self.delete(key).await {
            Ok(_) => true,
            Err(e) => {
                warn!("Cache delete failed: key={}, error={}", key, e);
                false
            }
        }
    }

    /// Active round-trip probe
    pub async fn health_check(&self) -> bool {
        match &self.pool {
            Some(pool) => pool.is_healthy().await,
            None => false,
        }
    }

    /// Last observed link state without touching the wire
    pub async fn link_state(&self) -> Option<LinkState> {
        match &self.pool {
            Some(pool) => Some(pool.link_state().await),
            None => None,
        }
    }

    /// Passive snapshot for `/metrics` and `/health/ready`
    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            enabled: self.is_enabled(),
            link: self.link_state().await,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_cache_degrades_cleanly() {
        let cache = CacheManager::disabled();
        assert!(!cache.is_enabled());

        assert_eq!(cache.get::<String>("payment:x").await.unwrap(), None);
        cache
            .set("payment:x", &"value".to_string(), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(!cache.delete("payment:x").await.unwrap());
        assert_eq!(cache.invalidate_prefix("payment_list:").await.unwrap(), 0);
        assert!(cache.incr("counter").await.is_err());
        assert!(!cache.health_check().await);
    }

    #[tokio::test]
    async fn test_disabled_cache_counts_misses() {
        let cache = CacheManager::disabled();
        let _: Option<String> = cache.get("payment:a").await.unwrap();
        let _: Option<String> = cache.get_quiet("payment:b").await;

        let stats = cache.stats().await;
        assert!(!stats.enabled);
        assert!(stats.link.is_none());
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 2);
    }

    #[tokio::test]
    async fn test_stats_are_shared_across_clones() {
        let cache = CacheManager::disabled();
        let clone = cache.clone();

        let _: Option<String> = clone.get("payment:x").await.unwrap();
        assert_eq!(cache.stats().await.misses, 1);
    }
}
