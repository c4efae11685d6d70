//! Caching decorator over the audit log repository
//!
//! Audit rows are immutable once written, so list results only go stale
//! through appends; every append sweeps the list prefix.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

use crate::cache::{keys, CacheManager};
use crate::models::{AuditLog, AuditLogFilter, NewAuditLog, Pagination};
use crate::repository::audit_log_repository::AuditLogRepository;
use crate::repository::InvalidationSink;
use crate::Result;

#[derive(Clone)]
pub struct CachedAuditLogRepository {
    inner: Arc<dyn AuditLogRepository>,
    cache: CacheManager,
    list_ttl: Duration,
    invalidation_sink: Option<Arc<dyn InvalidationSink>>,
}

impl CachedAuditLogRepository {
    pub fn new(inner: Arc<dyn AuditLogRepository>, cache: CacheManager, list_ttl: Duration) -> Self {
        Self {
            inner,
            cache,
            list_ttl,
            invalidation_sink: None,
        }
    }

    pub fn with_invalidation_sink(mut self, sink: Arc<dyn InvalidationSink>) -> Self {
        self.invalidation_sink = Some(sink);
        self
    }

    /// Sweep cached audit lists after an append or purge
    pub async fn sweep_lists(&self) {
        if let Err(e) = self.cache.invalidate_prefix("audit_list:").await {
            warn!("Audit list invalidation failed, deferring: error={}", e);
            if let Some(sink) = &self.invalidation_sink {
                sink.defer_invalidation("audit_list:".to_string());
            }
        }
    }
}

#[async_trait]
impl AuditLogRepository for CachedAuditLogRepository {
    async fn append(&self, record: NewAuditLog) -> Result<AuditLog> {
        let log = self.inner.append(record).await?;
        self.sweep_lists().await;
        Ok(log)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<AuditLog>> {
        self.inner.find_by_id(id).await
    }

    async fn list(
        &self,
        filter: &AuditLogFilter,
        pagination: &Pagination,
    ) -> Result<Vec<AuditLog>> {
        let key = keys::audit_list(&format!(
            "{}:p{}:n{}",
            filter.fingerprint(),
            pagination.page,
            pagination.per_page
        ));

        if let Some(records) = self.cache.get_quiet::<Vec<AuditLog>>(&key).await {
            return Ok(records);
        }

        let records = self.inner.list(filter, pagination).await?;
        self.cache.set_quiet(&key, &records, self.list_ttl).await;
        Ok(records)
    }

    async fn count(&self, filter: &AuditLogFilter) -> Result<i64> {
        let key = keys::audit_list(&format!("{}:count", filter.fingerprint()));

        if let Some(count) = self.cache.get_quiet::<i64>(&key).await {
            return Ok(count);
        }

        let count = self.inner.count(filter).await?;
        self.cache.set_quiet(&key, &count, self.list_ttl).await;
        Ok(count)
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let purged = self.inner.purge_before(cutoff).await?;
        self.sweep_lists().await;
        Ok(purged)
    }
}
