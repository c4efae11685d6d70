//! Database access utilities

pub mod migrate;

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Duration;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::{Error, Result};

/// Create a Postgres connection pool from configuration
///
/// Pool sizing follows the configured base size plus overflow as the hard
/// connection cap.
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .min_connections(config.pool_size.min(2))
        .max_connections(config.max_connections())
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.url)
        .await
        .map_err(Error::Database)?;

    info!(
        "Database pool created: max_connections={}",
        config.max_connections()
    );

    Ok(pool)
}

/// Shared handle over the connection pool
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Begin a transaction; one transaction per request or work item
    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        self.pool.begin().await.map_err(Error::Database)
    }

    /// Cheap readiness probe
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }
}
