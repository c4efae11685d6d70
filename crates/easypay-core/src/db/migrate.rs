//! Schema management
//!
//! Migrations are SQL files embedded at compile time and applied in
//! version order on startup. Applied versions are tracked in a
//! `_migrations` table so reruns are no-ops, and `status()` reports the
//! schema plus row-count picture for operational probes.

use std::collections::HashSet;

use sqlx::PgPool;
use tracing::{debug, info};

use crate::{Error, Result};

/// Embedded migrations, ascending by version
const MIGRATIONS: &[(i64, &str, &str)] = &[(
    1,
    "initial_schema",
    include_str!("../../migrations/001_initial_schema.sql"),
)];

/// Schema and data overview for `easypay check`
///
/// Row counts are `None` until the corresponding table exists.
#[derive(Debug, Clone)]
pub struct DbStatus {
    pub applied_migrations: i64,
    pub pending_migrations: usize,
    pub payment_count: Option<i64>,
    pub webhook_count: Option<i64>,
    pub audit_log_count: Option<i64>,
}

impl DbStatus {
    pub fn is_up_to_date(&self) -> bool {
        self.pending_migrations == 0
    }
}

/// Applies and reports on embedded schema migrations
pub struct Migrator {
    pool: PgPool,
}

impl Migrator {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the version-tracking table when it does not exist yet
    async fn ensure_version_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                version BIGINT PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(())
    }

    async fn applied_versions(&self) -> Result<HashSet<i64>> {
        let versions: Vec<i64> = sqlx::query_scalar("SELECT version FROM _migrations")
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(versions.into_iter().collect())
    }

    async fn mark_applied(&self, version: i64, name: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO _migrations (version, name) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(version)
        .bind(name)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(())
    }

    /// Bring the schema up to date; returns how many migrations ran
    pub async fn migrate(&self) -> Result<u32> {
        self.ensure_version_table().await?;
        let applied = self.applied_versions().await?;

        debug!(
            "Schema check: {} of {} migrations applied",
            applied.len(),
            MIGRATIONS.len()
        );

        let mut ran = 0u32;
        for (version, name, sql) in MIGRATIONS {
            if applied.contains(version) {
                continue;
            }

            info!("Running migration {:03} {}", version, name);

            // The migration files use DO $$ blocks, which contain
            // semicolons; each file must go to the server as one batch.
            sqlx::raw_sql(sql)
                .execute(&self.pool)
                .await
                .map_err(Error::Database)?;

            self.mark_applied(*version, name).await?;
            ran += 1;
        }

        if ran == 0 {
            info!("Schema is up to date");
        } else {
            info!("Schema updated: {} migration(s) ran", ran);
        }

        Ok(ran)
    }

    /// Snapshot schema state and entity row counts
    pub async fn status(&self) -> Result<DbStatus> {
        self.ensure_version_table().await?;
        let applied = self.applied_versions().await?;
        let pending = MIGRATIONS
            .iter()
            .filter(|(version, _, _)| !applied.contains(version))
            .count();

        Ok(DbStatus {
            applied_migrations: applied.len() as i64,
            pending_migrations: pending,
            payment_count: self.table_count("payments").await,
            webhook_count: self.table_count("webhooks").await,
            audit_log_count: self.table_count("audit_logs").await,
        })
    }

    /// `None` when the table is missing (schema not migrated yet)
    async fn table_count(&self, table: &str) -> Option<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", table);
        sqlx::query_scalar(&sql).fetch_one(&self.pool).await.ok()
    }
}

/// Run migrations against a pool
pub async fn auto_migrate(pool: &PgPool) -> Result<()> {
    Migrator::new(pool.clone()).migrate().await?;
    Ok(())
}
