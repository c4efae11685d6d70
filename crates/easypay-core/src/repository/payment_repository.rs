//! Payment repository
//!
//! Pool-backed reads and inserts behind the `PaymentRepository` trait, plus
//! transaction-scoped free functions (`find_for_update`, `insert`,
//! `apply_transition`) used by the payment engine so that row locks and
//! commit boundaries stay under the engine's control.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::db::Database;
use crate::models::{
    Pagination, Payment, PaymentFilter, PaymentMethod, PaymentStats, PaymentStatus, SortDirection,
};
use crate::{Error, Result};

/// Insert payload for a new payment row
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub external_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
    pub payment_method: PaymentMethod,
    pub customer_id: Option<String>,
    pub customer_email: Option<String>,
    pub customer_name: Option<String>,
    pub card_token: Option<String>,
    pub description: Option<String>,
    pub metadata: serde_json::Value,
    pub is_test: bool,
}

/// Field changes applied by one lifecycle transition
///
/// `authorize_net_transaction_id` is write-once: the SQL keeps the existing
/// value when one is already set.
#[derive(Debug, Clone, Default)]
pub struct PaymentTransition {
    pub status: Option<PaymentStatus>,
    pub authorize_net_transaction_id: Option<String>,
    pub processor_response_code: Option<String>,
    pub processor_response_message: Option<String>,
    pub card_last_four: Option<String>,
    pub card_brand: Option<String>,
    pub card_exp_month: Option<String>,
    pub card_exp_year: Option<String>,
    pub refund_amount_delta: Decimal,
    pub refund_count_delta: i32,
    pub processed_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
}

/// Payment repository trait - database agnostic
#[async_trait]
pub trait PaymentRepository: Send + Sync + 'static {
    /// Insert a new payment
    async fn create(&self, new: NewPayment) -> Result<Payment>;

    /// Find payment by internal ID
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Payment>>;

    /// Find payment by merchant-facing external ID
    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<Payment>>;

    /// Find payment by upstream processor transaction ID
    async fn find_by_processor_transaction_id(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Payment>>;

    /// Update description/metadata only
    async fn update_details(
        &self,
        id: Uuid,
        description: Option<String>,
        metadata: Option<serde_json::Value>,
    ) -> Result<Payment>;

    /// List payments with filtering and pagination
    async fn list(
        &self,
        filter: &PaymentFilter,
        pagination: &Pagination,
        direction: SortDirection,
    ) -> Result<Vec<Payment>>;

    /// Count payments matching a filter
    async fn count(&self, filter: &PaymentFilter) -> Result<i64>;

    /// Search payments by external id, customer fields, or description
    async fn search(&self, term: &str, pagination: &Pagination) -> Result<Vec<Payment>>;

    /// Aggregate statistics over matching payments
    async fn stats(&self, filter: &PaymentFilter) -> Result<PaymentStats>;
}

/// PostgreSQL implementation of PaymentRepository
#[derive(Clone)]
pub struct PgPaymentRepository {
    db: Database,
}

impl PgPaymentRepository {
    /// Create a new PostgreSQL payment repository
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

/// True when the error is a Postgres unique-constraint violation
pub fn is_unique_violation(error: &Error) -> bool {
    match error {
        Error::Database(sqlx::Error::Database(db_err)) => {
            db_err.code().as_deref() == Some("23505")
        }
        _ => false,
    }
}

#[async_trait]
impl PaymentRepository for PgPaymentRepository {
    async fn create(&self, new: NewPayment) -> Result<Payment> {
        let mut conn = self.db.pool().acquire().await.map_err(Error::Database)?;
        insert(&mut conn, &new).await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Payment>> {
        let payment = sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = $1")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await
            .map_err(Error::Database)?;

        Ok(payment)
    }

    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<Payment>> {
        let payment =
            sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE external_id = $1")
                .bind(external_id)
                .fetch_optional(self.db.pool())
                .await
                .map_err(Error::Database)?;

        Ok(payment)
    }

    async fn find_by_processor_transaction_id(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Payment>> {
        let payment = sqlx::query_as::<_, Payment>(
            "SELECT * FROM payments WHERE authorize_net_transaction_id = $1",
        )
        .bind(transaction_id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(Error::Database)?;

        Ok(payment)
    }

    async fn update_details(
        &self,
        id: Uuid,
        description: Option<String>,
        metadata: Option<serde_json::Value>,
    ) -> Result<Payment> {
        let payment = sqlx::query_as::<_, Payment>(
            r#"
            UPDATE payments SET
                description = COALESCE($2, description),
                metadata = COALESCE($3, metadata),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(description)
        .bind(metadata)
        .fetch_optional(self.db.pool())
        .await
        .map_err(Error::Database)?;

        payment.ok_or_else(|| Error::not_found(format!("Payment {} not found", id)))
    }

    async fn list(
        &self,
        filter: &PaymentFilter,
        pagination: &Pagination,
        direction: SortDirection,
    ) -> Result<Vec<Payment>> {
        let mut sql = String::from("SELECT * FROM payments WHERE 1=1");
        let mut bind_idx = 0;

        if filter.customer_id.is_some() {
            bind_idx += 1;
            sql.push_str(&format!(" AND customer_id = ${}", bind_idx));
        }
        if filter.status.is_some() {
            bind_idx += 1;
            sql.push_str(&format!(" AND status = ${}", bind_idx));
        }
        if filter.created_after.is_some() {
            bind_idx += 1;
            sql.push_str(&format!(" AND created_at >= ${}", bind_idx));
        }
        if filter.created_before.is_some() {
            bind_idx += 1;
            sql.push_str(&format!(" AND created_at <= ${}", bind_idx));
        }

        sql.push_str(&format!(
            " ORDER BY created_at {} LIMIT {} OFFSET {}",
            direction.as_sql(),
            pagination.limit(),
            pagination.offset()
        ));

        let mut query = sqlx::query_as::<_, Payment>(&sql);

        if let Some(customer_id) = &filter.customer_id {
            query = query.bind(customer_id);
        }
        if let Some(status) = filter.status {
            query = query.bind(status);
        }
        if let Some(created_after) = filter.created_after {
            query = query.bind(created_after);
        }
        if let Some(created_before) = filter.created_before {
            query = query.bind(created_before);
        }

        let payments = query
            .fetch_all(self.db.pool())
            .await
            .map_err(Error::Database)?;

        Ok(payments)
    }

    async fn count(&self, filter: &PaymentFilter) -> Result<i64> {
        let mut sql = String::from("SELECT COUNT(*) FROM payments WHERE 1=1");
        let mut bind_idx = 0;

        if filter.customer_id.is_some() {
            bind_idx += 1;
            sql.push_str(&format!(" AND customer_id = ${}", bind_idx));
        }
        if filter.status.is_some() {
            bind_idx += 1;
            sql.push_str(&format!(" AND status = ${}", bind_idx));
        }
        if filter.created_after.is_some() {
            bind_idx += 1;
            sql.push_str(&format!(" AND created_at >= ${}", bind_idx));
        }
        if filter.created_before.is_some() {
            bind_idx += 1;
            sql.push_str(&format!(" AND created_at <= ${}", bind_idx));
        }

        let mut query = sqlx::query_scalar::<_, i64>(&sql);

        if let Some(customer_id) = &filter.customer_id {
            query = query.bind(customer_id);
        }
        if let Some(status) = filter.status {
            query = query.bind(status);
        }
        if let Some(created_after) = filter.created_after {
            query = query.bind(created_after);
        }
        if let Some(created_before) = filter.created_before {
            query = query.bind(created_before);
        }

        let count = query
            .fetch_one(self.db.pool())
            .await
            .map_err(Error::Database)?;

        Ok(count)
    }

    async fn search(&self, term: &str, pagination: &Pagination) -> Result<Vec<Payment>> {
        let pattern = format!("%{}%", term);

        let payments = sqlx::query_as::<_, Payment>(
            r#"
            SELECT * FROM payments
            WHERE external_id ILIKE $1
               OR customer_id ILIKE $1
               OR customer_email ILIKE $1
               OR customer_name ILIKE $1
               OR description ILIKE $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(pattern)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(self.db.pool())
        .await
        .map_err(Error::Database)?;

        Ok(payments)
    }

    async fn stats(&self, filter: &PaymentFilter) -> Result<PaymentStats> {
        let mut sql = String::from(
            r#"
            SELECT
                COUNT(*) AS total_count,
                COALESCE(SUM(amount), 0) AS total_amount,
                COALESCE(SUM(refunded_amount), 0) AS refunded_amount,
                COUNT(*) FILTER (WHERE status IN ('captured', 'settled')) AS captured_count,
                COUNT(*) FILTER (WHERE status IN ('refunded', 'partially_refunded')) AS refunded_count,
                COUNT(*) FILTER (WHERE status IN ('failed', 'declined')) AS failed_count
            FROM payments WHERE 1=1
            "#,
        );
        let mut bind_idx = 0;

        if filter.customer_id.is_some() {
            bind_idx += 1;
            sql.push_str(&format!(" AND customer_id = ${}", bind_idx));
        }
        if filter.created_after.is_some() {
            bind_idx += 1;
            sql.push_str(&format!(" AND created_at >= ${}", bind_idx));
        }
        if filter.created_before.is_some() {
            bind_idx += 1;
            sql.push_str(&format!(" AND created_at <= ${}", bind_idx));
        }

        let mut query = sqlx::query_as::<_, StatsRow>(&sql);

        if let Some(customer_id) = &filter.customer_id {
            query = query.bind(customer_id);
        }
        if let Some(created_after) = filter.created_after {
            query = query.bind(created_after);
        }
        if let Some(created_before) = filter.created_before {
            query = query.bind(created_before);
        }

        let row = query
            .fetch_one(self.db.pool())
            .await
            .map_err(Error::Database)?;

        Ok(PaymentStats {
            total_count: row.total_count,
            total_amount: row.total_amount,
            refunded_amount: row.refunded_amount,
            captured_count: row.captured_count,
            refunded_count: row.refunded_count,
            failed_count: row.failed_count,
        })
    }
}

#[derive(sqlx::FromRow)]
struct StatsRow {
    total_count: i64,
    total_amount: Decimal,
    refunded_amount: Decimal,
    captured_count: i64,
    refunded_count: i64,
    failed_count: i64,
}

/// Insert a payment inside the caller's transaction
pub async fn insert(conn: &mut PgConnection, new: &NewPayment) -> Result<Payment> {
    let payment = sqlx::query_as::<_, Payment>(
        r#"
        INSERT INTO payments (
            external_id, amount, currency, status, payment_method,
            customer_id, customer_email, customer_name, card_token,
            description, metadata, is_test, is_live
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        RETURNING *
        "#,
    )
    .bind(&new.external_id)
    .bind(new.amount)
    .bind(&new.currency)
    .bind(new.status)
    .bind(new.payment_method)
    .bind(&new.customer_id)
    .bind(&new.customer_email)
    .bind(&new.customer_name)
    .bind(&new.card_token)
    .bind(&new.description)
    .bind(&new.metadata)
    .bind(new.is_test)
    .bind(!new.is_test)
    .fetch_one(conn)
    .await
    .map_err(Error::Database)?;

    Ok(payment)
}

/// Fetch a payment row under an exclusive row lock
///
/// The lock is held for the remainder of the caller's transaction, which
/// serializes concurrent mutations of the same payment across the upstream
/// processor call.
pub async fn find_for_update(conn: &mut PgConnection, id: Uuid) -> Result<Option<Payment>> {
    let payment = sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(conn)
        .await
        .map_err(Error::Database)?;

    Ok(payment)
}

/// Update description/metadata inside the caller's transaction
pub async fn update_details(
    conn: &mut PgConnection,
    id: Uuid,
    description: Option<String>,
    metadata: Option<serde_json::Value>,
) -> Result<Payment> {
    let payment = sqlx::query_as::<_, Payment>(
        r#"
        UPDATE payments SET
            description = COALESCE($2, description),
            metadata = COALESCE($3, metadata),
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(description)
    .bind(metadata)
    .fetch_optional(conn)
    .await
    .map_err(Error::Database)?;

    payment.ok_or_else(|| Error::not_found(format!("Payment {} not found", id)))
}

/// Apply a lifecycle transition inside the caller's transaction
pub async fn apply_transition(
    conn: &mut PgConnection,
    id: Uuid,
    change: &PaymentTransition,
) -> Result<Payment> {
    let payment = sqlx::query_as::<_, Payment>(
        r#"
        UPDATE payments SET
            status = COALESCE($2, status),
            authorize_net_transaction_id = COALESCE(authorize_net_transaction_id, $3),
            processor_response_code = COALESCE($4, processor_response_code),
            processor_response_message = COALESCE($5, processor_response_message),
            card_last_four = COALESCE($6, card_last_four),
            card_brand = COALESCE($7, card_brand),
            card_exp_month = COALESCE($8, card_exp_month),
            card_exp_year = COALESCE($9, card_exp_year),
            refunded_amount = refunded_amount + $10,
            refund_count = refund_count + $11,
            processed_at = COALESCE(processed_at, $12),
            settled_at = COALESCE(settled_at, $13),
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(change.status)
    .bind(&change.authorize_net_transaction_id)
    .bind(&change.processor_response_code)
    .bind(&change.processor_response_message)
    .bind(&change.card_last_four)
    .bind(&change.card_brand)
    .bind(&change.card_exp_month)
    .bind(&change.card_exp_year)
    .bind(change.refund_amount_delta)
    .bind(change.refund_count_delta)
    .bind(change.processed_at)
    .bind(change.settled_at)
    .fetch_optional(conn)
    .await
    .map_err(Error::Database)?;

    payment.ok_or_else(|| Error::not_found(format!("Payment {} not found", id)))
}
