//! Redis connection configuration

use std::time::Duration;

/// Redis connection settings
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Connection URL, e.g. `redis://127.0.0.1:6379/0`
    pub url: String,

    /// Pool size hint
    pub pool_size: usize,

    /// Max reconnect attempts before the pool reports failure
    pub max_retries: u32,

    /// Delay between reconnect attempts
    pub retry_delay_ms: u64,

    /// Default TTL for cached entities
    pub default_ttl_secs: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            pool_size: 10,
            max_retries: 3,
            retry_delay_ms: 250,
            default_ttl_secs: 300,
        }
    }
}

impl RedisConfig {
    pub fn from_settings(settings: &crate::config::CacheSettings) -> Option<Self> {
        settings.redis_url.as_ref().map(|url| Self {
            url: url.clone(),
            pool_size: settings.pool_size as usize,
            default_ttl_secs: settings.entity_ttl_secs,
            ..Default::default()
        })
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}
