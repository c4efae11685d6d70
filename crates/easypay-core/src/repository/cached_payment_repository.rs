//! Caching decorator over the payment repository
//!
//! Cache-aside for single-entity lookups; list/stats results are cached
//! under filter fingerprints and swept on every successful mutation.
//! Cache trouble never surfaces to callers.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

use crate::cache::{keys, CacheManager};
use crate::models::{Pagination, Payment, PaymentFilter, PaymentStats, SortDirection};
use crate::repository::payment_repository::{NewPayment, PaymentRepository};
use crate::repository::InvalidationSink;
use crate::Result;

#[derive(Clone)]
pub struct CachedPaymentRepository {
    inner: Arc<dyn PaymentRepository>,
    cache: CacheManager,
    entity_ttl: Duration,
    list_ttl: Duration,
    invalidation_sink: Option<Arc<dyn InvalidationSink>>,
}

impl CachedPaymentRepository {
    pub fn new(
        inner: Arc<dyn PaymentRepository>,
        cache: CacheManager,
        entity_ttl: Duration,
        list_ttl: Duration,
    ) -> Self {
        Self {
            inner,
            cache,
            entity_ttl,
            list_ttl,
            invalidation_sink: None,
        }
    }

    pub fn with_invalidation_sink(mut self, sink: Arc<dyn InvalidationSink>) -> Self {
        self.invalidation_sink = Some(sink);
        self
    }

    /// Prime all entity keys for a payment
    async fn prime(&self, payment: &Payment) {
        self.cache
            .set_quiet(&keys::payment(payment.id), payment, self.entity_ttl)
            .await;
        self.cache
            .set_quiet(
                &keys::payment_external(&payment.external_id),
                payment,
                self.entity_ttl,
            )
            .await;
        if let Some(txn_id) = &payment.authorize_net_transaction_id {
            self.cache
                .set_quiet(&keys::payment_authnet(txn_id), payment, self.entity_ttl)
                .await;
        }
    }

    /// Drop list/stats entries; defer the sweep when the cache is down
    async fn sweep_derived(&self) {
        for prefix in keys::PAYMENT_SWEEP_PREFIXES {
            if let Err(e) = self.cache.invalidate_prefix(prefix).await {
                warn!(
                    "Cache invalidation failed, deferring: prefix={}, error={}",
                    prefix, e
                );
                if let Some(sink) = &self.invalidation_sink {
                    sink.defer_invalidation(prefix.to_string());
                }
            }
        }
    }

    /// Refresh entity keys and sweep derived entries after a committed write
    ///
    /// Also used by the payment engine, whose mutations go through its own
    /// transactions rather than this decorator.
    pub async fn invalidate_after_write(&self, payment: &Payment) {
        self.prime(payment).await;
        self.sweep_derived().await;
    }
}

#[async_trait]
impl PaymentRepository for CachedPaymentRepository {
    async fn create(&self, new: NewPayment) -> Result<Payment> {
        let payment = self.inner.create(new).await?;
        self.invalidate_after_write(&payment).await;
        Ok(payment)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Payment>> {
        let key = keys::payment(id);
        if let Some(payment) = self.cache.get_quiet::<Payment>(&key).await {
            return Ok(Some(payment));
        }

        let payment = self.inner.find_by_id(id).await?;
        if let Some(payment) = &payment {
            self.prime(payment).await;
        }
        Ok(payment)
    }

    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<Payment>> {
        let key = keys::payment_external(external_id);
        if let Some(payment) = self.cache.get_quiet::<Payment>(&key).await {
            return Ok(Some(payment));
        }

        let payment = self.inner.find_by_external_id(external_id).await?;
        if let Some(payment) = &payment {
            self.prime(payment).await;
        }
        Ok(payment)
    }

    async fn find_by_processor_transaction_id(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Payment>> {
        let key = keys::payment_authnet(transaction_id);
        if let Some(payment) = self.cache.get_quiet::<Payment>(&key).await {
            return Ok(Some(payment));
        }

        let payment = self
            .inner
            .find_by_processor_transaction_id(transaction_id)
            .await?;
        if let Some(payment) = &payment {
            self.prime(payment).await;
        }
        Ok(payment)
    }

    async fn update_details(
        &self,
        id: Uuid,
        description: Option<String>,
        metadata: Option<serde_json::Value>,
    ) -> Result<Payment> {
        let payment = self.inner.update_details(id, description, metadata).await?;
        self.invalidate_after_write(&payment).await;
        Ok(payment)
    }

    async fn list(
        &self,
        filter: &PaymentFilter,
        pagination: &Pagination,
        direction: SortDirection,
    ) -> Result<Vec<Payment>> {
        let key = keys::payment_list(&format!(
            "{}:p{}:n{}:{}",
            filter.fingerprint(),
            pagination.page,
            pagination.per_page,
            direction.as_sql()
        ));

        if let Some(payments) = self.cache.get_quiet::<Vec<Payment>>(&key).await {
            return Ok(payments);
        }

        let payments = self.inner.list(filter, pagination, direction).await?;
        self.cache.set_quiet(&key, &payments, self.list_ttl).await;
        Ok(payments)
    }

    async fn count(&self, filter: &PaymentFilter) -> Result<i64> {
        let key = keys::payment_list(&format!("{}:count", filter.fingerprint()));

        if let Some(count) = self.cache.get_quiet::<i64>(&key).await {
            return Ok(count);
        }

        let count = self.inner.count(filter).await?;
        self.cache.set_quiet(&key, &count, self.list_ttl).await;
        Ok(count)
    }

    async fn search(&self, term: &str, pagination: &Pagination) -> Result<Vec<Payment>> {
        // Search terms are unbounded; not worth cache slots
        self.inner.search(term, pagination).await
    }

    async fn stats(&self, filter: &PaymentFilter) -> Result<PaymentStats> {
        let key = keys::payment_stats(&filter.fingerprint());

        if let Some(stats) = self.cache.get_quiet::<PaymentStats>(&key).await {
            return Ok(stats);
        }

        let stats = self.inner.stats(filter).await?;
        self.cache.set_quiet(&key, &stats, self.list_ttl).await;
        Ok(stats)
    }
}
