//! Webhook repository
//!
//! Pool-backed reads behind the `WebhookRepository` trait, plus
//! transaction-scoped free functions for the outbox insert and the
//! claim/settle cycle of the dispatcher. Claiming uses
//! `FOR UPDATE SKIP LOCKED` so concurrent dispatchers never fight over the
//! same due row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::db::Database;
use crate::models::{NewWebhook, Pagination, Webhook, WebhookEventType, WebhookStatus};
use crate::{Error, Result};

/// Filter parameters for listing webhooks
#[derive(Debug, Clone, Default)]
pub struct WebhookFilter {
    pub status: Option<WebhookStatus>,
    pub event_type: Option<WebhookEventType>,
    pub payment_id: Option<Uuid>,
}

/// Webhook repository trait - database agnostic
#[async_trait]
pub trait WebhookRepository: Send + Sync + 'static {
    /// Find webhook by ID
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Webhook>>;

    /// Find webhook by stable event ID
    async fn find_by_event_id(&self, event_id: &str) -> Result<Option<Webhook>>;

    /// List webhooks with filtering, newest first
    async fn list(&self, filter: &WebhookFilter, pagination: &Pagination) -> Result<Vec<Webhook>>;

    /// Count webhooks matching a filter
    async fn count(&self, filter: &WebhookFilter) -> Result<i64>;

    /// List webhooks for one payment, newest first
    async fn list_by_payment(&self, payment_id: Uuid, pagination: &Pagination)
        -> Result<Vec<Webhook>>;

    /// Count webhooks in a delivery state
    async fn count_by_status(&self, status: WebhookStatus) -> Result<i64>;
}

/// PostgreSQL implementation of WebhookRepository
#[derive(Clone)]
pub struct PgWebhookRepository {
    db: Database,
}

impl PgWebhookRepository {
    /// Create a new PostgreSQL webhook repository
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl WebhookRepository for PgWebhookRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Webhook>> {
        let webhook = sqlx::query_as::<_, Webhook>("SELECT * FROM webhooks WHERE id = $1")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await
            .map_err(Error::Database)?;

        Ok(webhook)
    }

    async fn find_by_event_id(&self, event_id: &str) -> Result<Option<Webhook>> {
        let webhook = sqlx::query_as::<_, Webhook>("SELECT * FROM webhooks WHERE event_id = $1")
            .bind(event_id)
            .fetch_optional(self.db.pool())
            .await
            .map_err(Error::Database)?;

        Ok(webhook)
    }

    async fn list(&self, filter: &WebhookFilter, pagination: &Pagination) -> Result<Vec<Webhook>> {
        let mut sql = String::from("SELECT * FROM webhooks WHERE 1=1");
        let mut bind_idx = 0;

        if filter.status.is_some() {
            bind_idx += 1;
            sql.push_str(&format!(" AND status = ${}", bind_idx));
        }
        if filter.event_type.is_some() {
            bind_idx += 1;
            sql.push_str(&format!(" AND event_type = ${}", bind_idx));
        }
        if filter.payment_id.is_some() {
            bind_idx += 1;
            sql.push_str(&format!(" AND payment_id = ${}", bind_idx));
        }

        sql.push_str(&format!(
            " ORDER BY created_at DESC LIMIT {} OFFSET {}",
            pagination.limit(),
            pagination.offset()
        ));

        let mut query = sqlx::query_as::<_, Webhook>(&sql);
        if let Some(status) = filter.status {
            query = query.bind(status);
        }
        if let Some(event_type) = filter.event_type {
            query = query.bind(event_type);
        }
        if let Some(payment_id) = filter.payment_id {
            query = query.bind(payment_id);
        }

        let webhooks = query
            .fetch_all(self.db.pool())
            .await
            .map_err(Error::Database)?;

        Ok(webhooks)
    }

    async fn count(&self, filter: &WebhookFilter) -> Result<i64> {
        let mut sql = String::from("SELECT COUNT(*) FROM webhooks WHERE 1=1");
        let mut bind_idx = 0;

        if filter.status.is_some() {
            bind_idx += 1;
            sql.push_str(&format!(" AND status = ${}", bind_idx));
        }
        if filter.event_type.is_some() {
            bind_idx += 1;
            sql.push_str(&format!(" AND event_type = ${}", bind_idx));
        }
        if filter.payment_id.is_some() {
            bind_idx += 1;
            sql.push_str(&format!(" AND payment_id = ${}", bind_idx));
        }

        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        if let Some(status) = filter.status {
            query = query.bind(status);
        }
        if let Some(event_type) = filter.event_type {
            query = query.bind(event_type);
        }
        if let Some(payment_id) = filter.payment_id {
            query = query.bind(payment_id);
        }

        let count = query
            .fetch_one(self.db.pool())
            .await
            .map_err(Error::Database)?;

        Ok(count)
    }

    async fn list_by_payment(
        &self,
        payment_id: Uuid,
        pagination: &Pagination,
    ) -> Result<Vec<Webhook>> {
        let webhooks = sqlx::query_as::<_, Webhook>(
            r#"
            SELECT * FROM webhooks
            WHERE payment_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(payment_id)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(self.db.pool())
        .await
        .map_err(Error::Database)?;

        Ok(webhooks)
    }

    async fn count_by_status(&self, status: WebhookStatus) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM webhooks WHERE status = $1")
            .bind(status)
            .fetch_one(self.db.pool())
            .await
            .map_err(Error::Database)?;

        Ok(count)
    }
}

/// Insert an outbox row inside the caller's transaction
///
/// Called by the payment engine in the same transaction as the payment
/// mutation; a rolled-back payment therefore never leaves an event behind.
pub async fn insert_outbox(conn: &mut PgConnection, new: &NewWebhook) -> Result<Webhook> {
    let webhook = sqlx::query_as::<_, Webhook>(
        r#"
        INSERT INTO webhooks (
            event_id, event_type, payment_id, url, payload,
            signature, headers, status, max_retries, correlation_id
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', $8, $9)
        RETURNING *
        "#,
    )
    .bind(&new.event_id)
    .bind(new.event_type)
    .bind(new.payment_id)
    .bind(&new.url)
    .bind(&new.payload)
    .bind(&new.signature)
    .bind(&new.headers)
    .bind(new.max_retries)
    .bind(&new.correlation_id)
    .fetch_one(conn)
    .await
    .map_err(Error::Database)?;

    Ok(webhook)
}

/// Claim the next due webhook under a skip-locked row lock
///
/// The returned row stays locked until the caller's transaction ends, so
/// exactly one dispatcher wins each event. Ordering is `next_retry_at ASC`
/// with fresh (never-attempted) rows first.
pub async fn claim_due(conn: &mut PgConnection, now: DateTime<Utc>) -> Result<Option<Webhook>> {
    let webhook = sqlx::query_as::<_, Webhook>(
        r#"
        SELECT * FROM webhooks
        WHERE status IN ('pending', 'retrying')
          AND (next_retry_at IS NULL OR next_retry_at <= $1)
        ORDER BY next_retry_at ASC NULLS FIRST
        LIMIT 1
        FOR UPDATE SKIP LOCKED
        "#,
    )
    .bind(now)
    .fetch_optional(conn)
    .await
    .map_err(Error::Database)?;

    Ok(webhook)
}

/// Claim one specific webhook if it is still deliverable
///
/// Used for the immediate attempt right after the enqueuing transaction
/// commits; a dispatcher sweep that got there first simply wins.
pub async fn claim_by_id(conn: &mut PgConnection, id: Uuid) -> Result<Option<Webhook>> {
    let webhook = sqlx::query_as::<_, Webhook>(
        r#"
        SELECT * FROM webhooks
        WHERE id = $1 AND status IN ('pending', 'retrying')
        FOR UPDATE SKIP LOCKED
        "#,
    )
    .bind(id)
    .fetch_optional(conn)
    .await
    .map_err(Error::Database)?;

    Ok(webhook)
}

/// Record a successful delivery
pub async fn mark_delivered(
    conn: &mut PgConnection,
    id: Uuid,
    response_status: i32,
    response_body: Option<String>,
    now: DateTime<Utc>,
) -> Result<Webhook> {
    let webhook = sqlx::query_as::<_, Webhook>(
        r#"
        UPDATE webhooks SET
            status = 'delivered',
            response_status = $2,
            response_body = $3,
            delivered_at = $4,
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(response_status)
    .bind(response_body)
    .bind(now)
    .fetch_one(conn)
    .await
    .map_err(Error::Database)?;

    Ok(webhook)
}

/// Record a permanent destination rejection
pub async fn mark_failed(
    conn: &mut PgConnection,
    id: Uuid,
    response_status: Option<i32>,
    response_body: Option<String>,
    now: DateTime<Utc>,
) -> Result<Webhook> {
    let webhook = sqlx::query_as::<_, Webhook>(
        r#"
        UPDATE webhooks SET
            status = 'failed',
            response_status = $2,
            response_body = $3,
            failed_at = $4,
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(response_status)
    .bind(response_body)
    .bind(now)
    .fetch_one(conn)
    .await
    .map_err(Error::Database)?;

    Ok(webhook)
}

/// Schedule the next retry attempt
pub async fn schedule_retry(
    conn: &mut PgConnection,
    id: Uuid,
    next_retry_at: DateTime<Utc>,
    response_status: Option<i32>,
    response_body: Option<String>,
) -> Result<Webhook> {
    let webhook = sqlx::query_as::<_, Webhook>(
        r#"
        UPDATE webhooks SET
            status = 'retrying',
            retry_count = retry_count + 1,
            next_retry_at = $2,
            response_status = $3,
            response_body = $4,
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(next_retry_at)
    .bind(response_status)
    .bind(response_body)
    .fetch_one(conn)
    .await
    .map_err(Error::Database)?;

    Ok(webhook)
}

/// Re-arm a permanently failed or expired webhook for delivery
///
/// Operator action: the retry budget starts over and the next sweep (or
/// an immediate dispatch) picks the row up.
pub async fn reset_for_retry(
    conn: &mut PgConnection,
    id: Uuid,
    now: DateTime<Utc>,
) -> Result<Option<Webhook>> {
    let webhook = sqlx::query_as::<_, Webhook>(
        r#"
        UPDATE webhooks SET
            status = 'retrying',
            retry_count = 0,
            next_retry_at = $2,
            failed_at = NULL,
            updated_at = NOW()
        WHERE id = $1 AND status IN ('failed', 'expired')
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(now)
    .fetch_optional(conn)
    .await
    .map_err(Error::Database)?;

    Ok(webhook)
}

/// Retire a webhook whose retry budget is exhausted
pub async fn mark_expired(
    conn: &mut PgConnection,
    id: Uuid,
    now: DateTime<Utc>,
) -> Result<Webhook> {
    let webhook = sqlx::query_as::<_, Webhook>(
        r#"
        UPDATE webhooks SET
            status = 'expired',
            failed_at = $2,
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(now)
    .fetch_one(conn)
    .await
    .map_err(Error::Database)?;

    Ok(webhook)
}
