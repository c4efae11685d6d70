//! Sliding-window rate limiter keyed by client identity

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::RateLimitSettings;

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

/// Derive the limiter identity for a request
///
/// API-keyed clients are tracked per key, everyone else per source IP.
pub fn client_identity(api_key: Option<&str>, client_ip: &str) -> String {
    match api_key {
        Some(key) if !key.is_empty() => format!("api_key:{}", key),
        _ => format!("ip:{}", client_ip),
    }
}

/// Per-identity timestamp deques with minute and hour windows
///
/// Eviction drops everything older than the hour window on each check, so
/// the deque stays bounded by the hourly limit; amortized O(1) when
/// requests arrive in time order.
#[derive(Clone)]
pub struct SlidingWindowRateLimiter {
    requests_per_minute: usize,
    requests_per_hour: usize,
    windows: Arc<Mutex<HashMap<String, VecDeque<Instant>>>>,
}

impl SlidingWindowRateLimiter {
    pub fn new(requests_per_minute: usize, requests_per_hour: usize) -> Self {
        Self {
            requests_per_minute,
            requests_per_hour,
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn from_settings(settings: &RateLimitSettings) -> Self {
        Self::new(
            settings.requests_per_minute as usize,
            settings.requests_per_hour as usize,
        )
    }

    /// Admit or reject one request; `Err` carries seconds until retry
    pub async fn check(&self, identity: &str) -> Result<(), u64> {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let window = windows.entry(identity.to_string()).or_default();

        // Evict past the hour window
        while let Some(front) = window.front() {
            if now.duration_since(*front) > HOUR {
                window.pop_front();
            } else {
                break;
            }
        }

        let minute_count = window
            .iter()
            .rev()
            .take_while(|t| now.duration_since(**t) <= MINUTE)
            .count();

        if minute_count >= self.requests_per_minute {
            let oldest_in_minute = window
                .iter()
                .find(|t| now.duration_since(**t) <= MINUTE)
                .copied()
                .unwrap_or(now);
            let retry_after = retry_after_secs(now, oldest_in_minute, MINUTE);
            debug!(
                "Rate limit exceeded (minute window): identity={}, count={}",
                identity, minute_count
            );
            return Err(retry_after);
        }

        if window.len() >= self.requests_per_hour {
            let oldest = window.front().copied().unwrap_or(now);
            let retry_after = retry_after_secs(now, oldest, HOUR);
            debug!(
                "Rate limit exceeded (hour window): identity={}, count={}",
                identity,
                window.len()
            );
            return Err(retry_after);
        }

        window.push_back(now);
        Ok(())
    }

    /// Drop identities with no activity inside the hour window
    pub async fn cleanup(&self) {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        windows.retain(|_, window| {
            window
                .back()
                .map(|t| now.duration_since(*t) <= HOUR)
                .unwrap_or(false)
        });
    }

    /// Number of tracked identities
    pub async fn tracked_identities(&self) -> usize {
        self.windows.lock().await.len()
    }
}

fn retry_after_secs(now: Instant, oldest: Instant, window: Duration) -> u64 {
    let age = now.duration_since(oldest);
    let remaining = window.saturating_sub(age);
    remaining.as_secs().max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_allows_up_to_minute_limit() {
        let limiter = SlidingWindowRateLimiter::new(5, 100);

        for _ in 0..5 {
            assert!(limiter.check("ip:10.0.0.1").await.is_ok());
        }

        let retry_after = limiter.check("ip:10.0.0.1").await.unwrap_err();
        assert!(retry_after >= 1 && retry_after <= 60);
    }

    #[tokio::test]
    async fn test_identities_are_independent() {
        let limiter = SlidingWindowRateLimiter::new(1, 100);

        assert!(limiter.check("ip:10.0.0.1").await.is_ok());
        assert!(limiter.check("ip:10.0.0.1").await.is_err());
        assert!(limiter.check("ip:10.0.0.2").await.is_ok());
        assert!(limiter.check("api_key:k1").await.is_ok());
    }

    #[tokio::test]
    async fn test_hour_limit_applies_even_under_minute_limit() {
        let limiter = SlidingWindowRateLimiter::new(100, 3);

        for _ in 0..3 {
            assert!(limiter.check("ip:10.0.0.9").await.is_ok());
        }
        let retry_after = limiter.check("ip:10.0.0.9").await.unwrap_err();
        assert!(retry_after >= 1 && retry_after <= 3600);
    }

    #[tokio::test]
    async fn test_cleanup_drops_idle_identities() {
        let limiter = SlidingWindowRateLimiter::new(10, 100);
        limiter.check("ip:10.0.0.1").await.unwrap();
        assert_eq!(limiter.tracked_identities().await, 1);

        limiter.cleanup().await;
        // Entry is recent, stays tracked
        assert_eq!(limiter.tracked_identities().await, 1);
    }

    #[test]
    fn test_identity_derivation() {
        assert_eq!(client_identity(Some("key123"), "1.2.3.4"), "api_key:key123");
        assert_eq!(client_identity(Some(""), "1.2.3.4"), "ip:1.2.3.4");
        assert_eq!(client_identity(None, "1.2.3.4"), "ip:1.2.3.4");
    }
}
