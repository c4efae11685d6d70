//! Redis connectivity

use crate::cache::{CacheError, CacheResult, RedisConfig};
use redis::aio::ConnectionManager;
use redis::Client as RedisClient;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Health of the multiplexed Redis link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Commands are flowing
    Online,

    /// A dial loop is running
    Recovering,

    /// Dialing gave up; the next `get` starts a fresh loop
    Offline,
}

impl LinkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkState::Online => "online",
            LinkState::Recovering => "recovering",
            LinkState::Offline => "offline",
        }
    }
}

struct PoolInner {
    manager: Option<ConnectionManager>,
    state: LinkState,
}

impl std::fmt::Debug for PoolInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolInner")
            .field("manager", &self.manager.is_some())
            .field("state", &self.state)
            .finish()
    }
}

/// Shared handle over one multiplexed Redis connection
///
/// `ConnectionManager` pipelines commands over a single connection; the
/// pool's job is tracking whether that link is usable and re-dialing it
/// with bounded retries when it is not. The write lock is held across a
/// dial loop so concurrent callers do not stampede the server.
#[derive(Clone, Debug)]
pub struct RedisPool {
    client: Arc<RedisClient>,
    inner: Arc<RwLock<PoolInner>>,
    config: Arc<RedisConfig>,
}

impl RedisPool {
    /// Dial Redis and validate the link before returning
    pub async fn new(config: RedisConfig) -> CacheResult<Self> {
        let client = RedisClient::open(&config.url[..])
            .map_err(|e| CacheError::ConnectionError(e.to_string()))?;

        let pool = Self {
            client: Arc::new(client),
            inner: Arc::new(RwLock::new(PoolInner {
                manager: None,
                state: LinkState::Offline,
            })),
            config: Arc::new(config),
        };

        pool.establish().await?;

        Ok(pool)
    }

    /// Hand out the multiplexed connection, re-dialing a lost link
    pub async fn get(&self) -> CacheResult<RedisConnection> {
        {
            let inner = self.inner.read().await;
            if inner.state == LinkState::Online {
                if let Some(manager) = &inner.manager {
                    return Ok(RedisConnection {
                        manager: manager.clone(),
                    });
                }
            }
        }

        self.establish().await?;

        let inner = self.inner.read().await;
        inner
            .manager
            .clone()
            .map(|manager| RedisConnection { manager })
            .ok_or_else(|| CacheError::ConnectionError("Redis link is down".to_string()))
    }

    /// Bounded dial loop; the first task in wins, later ones see Online
    async fn establish(&self) -> CacheResult<()> {
        let mut inner = self.inner.write().await;

        if inner.state == LinkState::Online && inner.manager.is_some() {
            return Ok(());
        }
        inner.state = LinkState::Recovering;

        let attempts = self.config.max_retries.max(1);
        for attempt in 1..=attempts {
            match self.dial().await {
                Ok(manager) => {
                    inner.manager = Some(manager);
                    inner.state = LinkState::Online;
                    info!("Redis link online: {}", self.config.url);
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "Redis dial {}/{} failed: url={}, error={}",
                        attempt, attempts, self.config.url, e
                    );
                    if attempt < attempts {
                        tokio::time::sleep(self.config.retry_delay()).await;
                    }
                }
            }
        }

        inner.state = LinkState::Offline;
        Err(CacheError::ConnectionError(format!(
            "Redis unreachable at {} after {} attempts",
            self.config.url, attempts
        )))
    }

    /// One dial, validated with a PING round trip
    async fn dial(&self) -> CacheResult<ConnectionManager> {
        let mut manager = ConnectionManager::new((*self.client).clone())
            .await
            .map_err(|e| CacheError::ConnectionError(e.to_string()))?;

        let reply: String = redis::cmd("PING")
            .query_async(&mut manager)
            .await
            .map_err(|e| CacheError::ConnectionError(e.to_string()))?;

        if reply != "PONG" {
            return Err(CacheError::ConnectionError(format!(
                "Unexpected PING reply: {}",
                reply
            )));
        }

        Ok(manager)
    }

    /// Last observed link state, for probes and metrics
    pub async fn link_state(&self) -> LinkState {
        self.inner.read().await.state
    }

    /// Active round-trip probe; a failure downgrades the recorded state
    pub async fn is_healthy(&self) -> bool {
        match self.get().await {
            Ok(mut conn) => match conn.ping().await {
                Ok(()) => true,
                Err(_) => {
                    self.inner.write().await.state = LinkState::Offline;
                    false
                }
            },
            Err(_) => false,
        }
    }
}

/// Single Redis connection wrapper
pub struct RedisConnection {
    manager: ConnectionManager,
}

impl RedisConnection {
    pub async fn ping(&mut self) -> CacheResult<()> {
        let _: String = redis::cmd("PING")
            .query_async(&mut self.manager)
            .await
            .map_err(|e| CacheError::OperationError(e.to_string()))?;
        Ok(())
    }

    /// Set a key with TTL
    pub async fn setex(&mut self, key: &str, ttl_secs: u64, value: &[u8]) -> CacheResult<()> {
        let _: () = redis::cmd("SETEX")
            .arg(key)
            .arg(ttl_secs)
            .arg(value)
            .query_async(&mut self.manager)
            .await
            .map_err(|e| CacheError::OperationError(e.to_string()))?;
        Ok(())
    }

    /// Get a key
    pub async fn get(&mut self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let result: Option<Vec<u8>> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut self.manager)
            .await
            .map_err(|e| CacheError::OperationError(e.to_string()))?;
        Ok(result)
    }

    /// Delete a key
    pub async fn del(&mut self, key: &str) -> CacheResult<bool> {
        let deleted: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut self.manager)
            .await
            .map_err(|e| CacheError::OperationError(e.to_string()))?;
        Ok(deleted > 0)
    }

    /// Delete a batch of keys
    pub async fn del_many(&mut self, keys: &[String]) -> CacheResult<i64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut cmd = redis::cmd("DEL");
        for key in keys {
            cmd.arg(key);
        }
        let deleted: i64 = cmd
            .query_async(&mut self.manager)
            .await
            .map_err(|e| CacheError::OperationError(e.to_string()))?;
        Ok(deleted)
    }

    /// Check if key exists
    pub async fn exists(&mut self, key: &str) -> CacheResult<bool> {
        let found: i64 = redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut self.manager)
            .await
            .map_err(|e| CacheError::OperationError(e.to_string()))?;
        Ok(found > 0)
    }

    /// Increment a counter
    pub async fn incr(&mut self, key: &str) -> CacheResult<i64> {
        let value: i64 = redis::cmd("INCR")
            .arg(key)
            .query_async(&mut self.manager)
            .await
            .map_err(|e| CacheError::OperationError(e.to_string()))?;
        Ok(value)
    }

    /// Set key expiration
    pub async fn expire(&mut self, key: &str, ttl_secs: u64) -> CacheResult<bool> {
        let set: i64 = redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl_secs)
            .query_async(&mut self.manager)
            .await
            .map_err(|e| CacheError::OperationError(e.to_string()))?;
        Ok(set > 0)
    }

    /// One SCAN step; returns the next cursor and matching keys
    pub async fn scan_match(
        &mut self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> CacheResult<(u64, Vec<String>)> {
        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut self.manager)
            .await
            .map_err(|e| CacheError::OperationError(e.to_string()))?;
        Ok((next, keys))
    }
}
