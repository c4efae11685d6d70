//! Caching decorator over the webhook repository

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::cache::{keys, CacheManager};
use crate::models::{Pagination, Webhook, WebhookStatus};
use crate::repository::webhook_repository::{WebhookFilter, WebhookRepository};
use crate::Result;

#[derive(Clone)]
pub struct CachedWebhookRepository {
    inner: Arc<dyn WebhookRepository>,
    cache: CacheManager,
    entity_ttl: Duration,
}

impl CachedWebhookRepository {
    pub fn new(inner: Arc<dyn WebhookRepository>, cache: CacheManager, entity_ttl: Duration) -> Self {
        Self {
            inner,
            cache,
            entity_ttl,
        }
    }

    async fn prime(&self, webhook: &Webhook) {
        self.cache
            .set_quiet(&keys::webhook(webhook.id), webhook, self.entity_ttl)
            .await;
        self.cache
            .set_quiet(
                &keys::webhook_event(&webhook.event_id),
                webhook,
                self.entity_ttl,
            )
            .await;
    }

    /// Drop entity keys after the dispatcher mutates delivery state
    pub async fn invalidate(&self, webhook: &Webhook) {
        self.cache.delete_quiet(&keys::webhook(webhook.id)).await;
        self.cache
            .delete_quiet(&keys::webhook_event(&webhook.event_id))
            .await;
    }
}

#[async_trait]
impl WebhookRepository for CachedWebhookRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Webhook>> {
        let key = keys::webhook(id);
        if let Some(webhook) = self.cache.get_quiet::<Webhook>(&key).await {
            return Ok(Some(webhook));
        }

        let webhook = self.inner.find_by_id(id).await?;
        if let Some(webhook) = &webhook {
            // Terminal rows are immutable and safe to cache; live ones churn
            if webhook.is_terminal() {
                self.prime(webhook).await;
            }
        }
        Ok(webhook)
    }

    async fn find_by_event_id(&self, event_id: &str) -> Result<Option<Webhook>> {
        let key = keys::webhook_event(event_id);
        if let Some(webhook) = self.cache.get_quiet::<Webhook>(&key).await {
            return Ok(Some(webhook));
        }

        let webhook = self.inner.find_by_event_id(event_id).await?;
        if let Some(webhook) = &webhook {
            if webhook.is_terminal() {
                self.prime(webhook).await;
            }
        }
        Ok(webhook)
    }

    async fn list(&self, filter: &WebhookFilter, pagination: &Pagination) -> Result<Vec<Webhook>> {
        self.inner.list(filter, pagination).await
    }

    async fn count(&self, filter: &WebhookFilter) -> Result<i64> {
        self.inner.count(filter).await
    }

    async fn list_by_payment(
        &self,
        payment_id: Uuid,
        pagination: &Pagination,
    ) -> Result<Vec<Webhook>> {
        self.inner.list_by_payment(payment_id, pagination).await
    }

    async fn count_by_status(&self, status: WebhookStatus) -> Result<i64> {
        self.inner.count_by_status(status).await
    }
}
