//! Audit log repository
//!
//! Append happens through the transaction-scoped `append` function so a
//! record always commits or rolls back with the mutation it describes.
//! Rows are never updated; the only delete path is the retention purge.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::db::Database;
use crate::models::{AuditLog, AuditLogFilter, NewAuditLog, Pagination};
use crate::{Error, Result};

/// Audit log repository trait - database agnostic
#[async_trait]
pub trait AuditLogRepository: Send + Sync + 'static {
    /// Append one record outside any caller transaction
    async fn append(&self, record: NewAuditLog) -> Result<AuditLog>;

    /// Find record by ID
    async fn find_by_id(&self, id: Uuid) -> Result<Option<AuditLog>>;

    /// List records with filtering, newest first
    async fn list(&self, filter: &AuditLogFilter, pagination: &Pagination)
        -> Result<Vec<AuditLog>>;

    /// Count records matching a filter
    async fn count(&self, filter: &AuditLogFilter) -> Result<i64>;

    /// Bulk-delete records older than the retention cutoff
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// PostgreSQL implementation of AuditLogRepository
#[derive(Clone)]
pub struct PgAuditLogRepository {
    db: Database,
}

impl PgAuditLogRepository {
    /// Create a new PostgreSQL audit log repository
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AuditLogRepository for PgAuditLogRepository {
    async fn append(&self, record: NewAuditLog) -> Result<AuditLog> {
        let mut conn = self.db.pool().acquire().await.map_err(Error::Database)?;
        append(&mut conn, &record).await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<AuditLog>> {
        let record = sqlx::query_as::<_, AuditLog>("SELECT * FROM audit_logs WHERE id = $1")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await
            .map_err(Error::Database)?;

        Ok(record)
    }

    async fn list(
        &self,
        filter: &AuditLogFilter,
        pagination: &Pagination,
    ) -> Result<Vec<AuditLog>> {
        let (sql, binder) = build_filter_sql("SELECT * FROM audit_logs WHERE 1=1", filter);
        let sql = format!(
            "{} ORDER BY created_at DESC LIMIT {} OFFSET {}",
            sql,
            pagination.limit(),
            pagination.offset()
        );

        let mut query = sqlx::query_as::<_, AuditLog>(&sql);
        query = binder.bind_all_query_as(query, filter);

        let records = query
            .fetch_all(self.db.pool())
            .await
            .map_err(Error::Database)?;

        Ok(records)
    }

    async fn count(&self, filter: &AuditLogFilter) -> Result<i64> {
        let (sql, binder) = build_filter_sql("SELECT COUNT(*) FROM audit_logs WHERE 1=1", filter);

        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        query = binder.bind_all_scalar(query, filter);

        let count = query
            .fetch_one(self.db.pool())
            .await
            .map_err(Error::Database)?;

        Ok(count)
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM audit_logs WHERE created_at < $1")
            .bind(cutoff)
            .execute(self.db.pool())
            .await
            .map_err(Error::Database)?;

        Ok(result.rows_affected())
    }
}

struct FilterBinder;

fn build_filter_sql(base: &str, filter: &AuditLogFilter) -> (String, FilterBinder) {
    let mut sql = String::from(base);
    let mut bind_idx = 0;

    if filter.action.is_some() {
        bind_idx += 1;
        sql.push_str(&format!(" AND action = ${}", bind_idx));
    }
    if filter.level.is_some() {
        bind_idx += 1;
        sql.push_str(&format!(" AND level = ${}", bind_idx));
    }
    if filter.payment_id.is_some() {
        bind_idx += 1;
        sql.push_str(&format!(" AND payment_id = ${}", bind_idx));
    }
    if filter.correlation_id.is_some() {
        bind_idx += 1;
        sql.push_str(&format!(" AND correlation_id = ${}", bind_idx));
    }
    if filter.created_after.is_some() {
        bind_idx += 1;
        sql.push_str(&format!(" AND created_at >= ${}", bind_idx));
    }
    if filter.created_before.is_some() {
        bind_idx += 1;
        sql.push_str(&format!(" AND created_at <= ${}", bind_idx));
    }

    (sql, FilterBinder)
}

impl FilterBinder {
    fn bind_all_query_as<'q>(
        &self,
        mut query: sqlx::query::QueryAs<'q, sqlx::Postgres, AuditLog, sqlx::postgres::PgArguments>,
        filter: &'q AuditLogFilter,
    ) -> sqlx::query::QueryAs<'q, sqlx::Postgres, AuditLog, sqlx::postgres::PgArguments> {
        if let Some(action) = filter.action {
            query = query.bind(action);
        }
        if let Some(level) = filter.level {
            query = query.bind(level);
        }
        if let Some(payment_id) = filter.payment_id {
            query = query.bind(payment_id);
        }
        if let Some(correlation_id) = &filter.correlation_id {
            query = query.bind(correlation_id);
        }
        if let Some(created_after) = filter.created_after {
            query = query.bind(created_after);
        }
        if let Some(created_before) = filter.created_before {
            query = query.bind(created_before);
        }
        query
    }

    fn bind_all_scalar<'q>(
        &self,
        mut query: sqlx::query::QueryScalar<'q, sqlx::Postgres, i64, sqlx::postgres::PgArguments>,
        filter: &'q AuditLogFilter,
    ) -> sqlx::query::QueryScalar<'q, sqlx::Postgres, i64, sqlx::postgres::PgArguments> {
        if let Some(action) = filter.action {
            query = query.bind(action);
        }
        if let Some(level) = filter.level {
            query = query.bind(level);
        }
        if let Some(payment_id) = filter.payment_id {
            query = query.bind(payment_id);
        }
        if let Some(correlation_id) = &filter.correlation_id {
            query = query.bind(correlation_id);
        }
        if let Some(created_after) = filter.created_after {
            query = query.bind(created_after);
        }
        if let Some(created_before) = filter.created_before {
            query = query.bind(created_before);
        }
        query
    }
}

/// Append one audit record inside the caller's transaction
pub async fn append(conn: &mut PgConnection, record: &NewAuditLog) -> Result<AuditLog> {
    let log = sqlx::query_as::<_, AuditLog>(
        r#"
        INSERT INTO audit_logs (
            action, level, message, entity_type, entity_id, payment_id,
            user_id, api_key_id, ip_address, user_agent, request_id,
            correlation_id, metadata, old_values, new_values
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        RETURNING *
        "#,
    )
    .bind(record.action)
    .bind(record.level)
    .bind(&record.message)
    .bind(&record.entity_type)
    .bind(&record.entity_id)
    .bind(record.payment_id)
    .bind(&record.user_id)
    .bind(&record.api_key_id)
    .bind(&record.ip_address)
    .bind(&record.user_agent)
    .bind(&record.request_id)
    .bind(&record.correlation_id)
    .bind(&record.metadata)
    .bind(&record.old_values)
    .bind(&record.new_values)
    .fetch_one(conn)
    .await
    .map_err(Error::Database)?;

    Ok(log)
}
