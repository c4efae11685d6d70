//! Append-only audit pipeline
//!
//! Lifecycle transitions append their record inside the same transaction
//! as the entity mutation (`audit::append`), so the trail and the entity
//! can never diverge. The `AuditRecorder` is the out-of-transaction facade
//! for standalone appends, queries and retention purges.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{AuditLog, AuditLogFilter, NewAuditLog, Pagination};
use crate::repository::cached_audit_log_repository::CachedAuditLogRepository;
use crate::repository::audit_log_repository::AuditLogRepository;
use crate::Result;

// Transaction-scoped append used by the engine and the dispatcher
pub use crate::repository::audit_log_repository::append;

/// Facade over the audit log store
#[derive(Clone)]
pub struct AuditRecorder {
    repo: CachedAuditLogRepository,
}

impl AuditRecorder {
    pub fn new(repo: CachedAuditLogRepository) -> Self {
        Self { repo }
    }

    /// Append one record in its own transaction
    ///
    /// For records tied to an entity mutation use `audit::append` inside
    /// that mutation's transaction instead.
    pub async fn record(&self, record: NewAuditLog) -> Result<AuditLog> {
        self.repo.append(record).await
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<AuditLog>> {
        self.repo.find_by_id(id).await
    }

    pub async fn list(
        &self,
        filter: &AuditLogFilter,
        pagination: &Pagination,
    ) -> Result<Vec<AuditLog>> {
        self.repo.list(filter, pagination).await
    }

    pub async fn count(&self, filter: &AuditLogFilter) -> Result<i64> {
        self.repo.count(filter).await
    }

    /// Bulk-delete records past the retention cutoff
    pub async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        self.repo.purge_before(cutoff).await
    }
}
