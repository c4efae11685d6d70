//! Repositories for database abstraction
//!
//! Plain Postgres repositories plus caching decorators implementing the
//! same traits. The decorators are cache-aside for single-entity reads and
//! write-through invalidating for mutations.

pub mod audit_log_repository;
pub mod cached_audit_log_repository;
pub mod cached_payment_repository;
pub mod cached_webhook_repository;
pub mod payment_repository;
pub mod webhook_repository;

pub use audit_log_repository::{AuditLogRepository, PgAuditLogRepository};
pub use cached_audit_log_repository::CachedAuditLogRepository;
pub use cached_payment_repository::CachedPaymentRepository;
pub use cached_webhook_repository::CachedWebhookRepository;
pub use payment_repository::{
    is_unique_violation, NewPayment, PaymentRepository, PaymentTransition, PgPaymentRepository,
};
pub use webhook_repository::{PgWebhookRepository, WebhookFilter, WebhookRepository};

/// Receiver for cache invalidations that could not run inline
///
/// Stale cache is tolerable, lost invalidation is not: when a prefix sweep
/// fails the cached repositories hand the prefix to this sink and the task
/// runner retries it in the background.
pub trait InvalidationSink: Send + Sync {
    fn defer_invalidation(&self, prefix: String);
}
