pub mod audit;
pub mod cache;
pub mod common;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod metrics;
pub mod models;
pub mod payment;
pub mod processor;
pub mod repository;
pub mod resilience;
pub mod webhook;

// Re-export commonly used types
pub use audit::AuditRecorder;
pub use common::{Clock, SystemClock};
pub use config::Config;
pub use db::{create_pool, Database};
pub use db::migrate::{auto_migrate, DbStatus, Migrator};
pub use error::{Error, Result};
pub use metrics::MetricsRegistry;
pub use models::{
    AuditAction, AuditLevel, AuditLog, AuditLogFilter, Pagination, Payment, PaymentFilter,
    PaymentMethod, PaymentStats, PaymentStatus, SortDirection, Webhook, WebhookEventType,
    WebhookStatus,
};
pub use payment::{PaymentEngine, PaymentObservability, RequestContext};
pub use processor::{AuthorizeNetClient, ProcessorClient, ProcessorError};
pub use repository::{
    CachedAuditLogRepository, CachedPaymentRepository, CachedWebhookRepository,
    PgAuditLogRepository, PgPaymentRepository, PgWebhookRepository,
};
pub use resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, RequestPriority, RequestQueue,
    SlidingWindowRateLimiter,
};
pub use webhook::WebhookDispatcher;

/// Current version of easypay
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_available() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_error_creation() {
        let err = Error::validation("Test validation error");
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.category(), "validation");
    }
}
