//! Redis caching layer
//!
//! This module provides Redis-based caching for:
//! - Single-entity payment/webhook/audit reads (cache-aside)
//! - List and stats query results keyed by filter fingerprint
//! - Payment status-change history
//! - Atomic counters
//!
//! Cache failures never fail the caller: reads fall through to the store
//! and failed invalidations are handed to the background task runner.

pub mod config;
pub mod connection;
pub mod manager;

// Re-export main types
pub use config::RedisConfig;
pub use connection::{LinkState, RedisConnection, RedisPool};
pub use manager::{CacheManager, CacheStats};

/// Cache result type alias
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache-specific error types
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Redis connection error: {0}")]
    ConnectionError(String),

    #[error("Operation failed: {0}")]
    OperationError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Timeout waiting for connection")]
    Timeout,
}

impl From<CacheError> for crate::Error {
    fn from(err: CacheError) -> Self {
        crate::Error::Cache(err.to_string())
    }
}

/// Cache key builders
///
/// Key layout: `payment:<uuid>`, `payment:external:<id>`,
/// `payment:authnet:<id>`, `payment_list:<fingerprint>`,
/// `payment_stats:<fingerprint>` and webhook/audit analogues.
pub mod keys {
    use uuid::Uuid;

    pub fn payment(id: Uuid) -> String {
        format!("payment:{}", id)
    }

    pub fn payment_external(external_id: &str) -> String {
        format!("payment:external:{}", external_id)
    }

    pub fn payment_authnet(transaction_id: &str) -> String {
        format!("payment:authnet:{}", transaction_id)
    }

    pub fn payment_history(id: Uuid) -> String {
        format!("payment:history:{}", id)
    }

    pub fn payment_list(fingerprint: &str) -> String {
        format!("payment_list:{}", fingerprint)
    }

    pub fn payment_stats(fingerprint: &str) -> String {
        format!("payment_stats:{}", fingerprint)
    }

    pub fn webhook(id: Uuid) -> String {
        format!("webhook:{}", id)
    }

    pub fn webhook_event(event_id: &str) -> String {
        format!("webhook:event:{}", event_id)
    }

    pub fn webhook_list(fingerprint: &str) -> String {
        format!("webhook_list:{}", fingerprint)
    }

    pub fn audit_list(fingerprint: &str) -> String {
        format!("audit_list:{}", fingerprint)
    }

    /// Prefixes swept by write-through invalidation after payment mutations
    pub const PAYMENT_SWEEP_PREFIXES: [&str; 2] = ["payment_list:", "payment_stats:"];
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_key_layout() {
        let id = Uuid::nil();
        assert_eq!(
            keys::payment(id),
            "payment:00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(
            keys::payment_external("pay_0123456789ab"),
            "payment:external:pay_0123456789ab"
        );
        assert_eq!(keys::payment_authnet("60123"), "payment:authnet:60123");
        assert_eq!(keys::payment_list("abcd"), "payment_list:abcd");
        assert_eq!(keys::payment_stats("abcd"), "payment_stats:abcd");
    }

    #[test]
    fn test_cache_error_converts_to_core_error() {
        let err: crate::Error = CacheError::OperationError("boom".to_string()).into();
        assert_eq!(err.category(), "cache");
        assert_eq!(err.status_code(), 500);
    }
}
