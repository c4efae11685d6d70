//! CLI subcommand implementations

use std::sync::Arc;
use tracing::{info, warn};

use easypay_core::processor::ProcessorClient;
use easypay_core::repository::{AuditLogRepository, PgAuditLogRepository};
use easypay_core::{create_pool, AuthorizeNetClient, Config, Database, Migrator};

/// Start the API server
pub async fn serve(config: Config) -> anyhow::Result<()> {
    easypay_api::run(config).await?;
    Ok(())
}

/// Apply pending migrations and exit
pub async fn migrate(config: Config) -> anyhow::Result<()> {
    let pool = create_pool(&config.database).await?;
    let ran = Migrator::new(pool).migrate().await?;
    if ran == 0 {
        info!("No pending migrations");
    } else {
        info!("Applied {} migration(s)", ran);
    }
    Ok(())
}

/// Validate configuration and probe external dependencies
pub async fn check(config: Config) -> anyhow::Result<()> {
    config.validate()?;
    info!("Configuration is valid");

    match create_pool(&config.database).await {
        Ok(pool) => {
            Database::new(pool.clone()).health_check().await?;
            let status = Migrator::new(pool).status().await?;
            info!(
                "Database reachable: {} migration(s) applied, {} pending",
                status.applied_migrations, status.pending_migrations
            );
            match (status.payment_count, status.webhook_count, status.audit_log_count) {
                (Some(payments), Some(webhooks), Some(audit_logs)) => {
                    info!(
                        "Row counts: payments={}, webhooks={}, audit_logs={}",
                        payments, webhooks, audit_logs
                    );
                }
                _ => warn!("Schema tables missing; run `easypay migrate`"),
            }
        }
        Err(e) => warn!("Database check failed: {}", e),
    }

    if config.processor.is_configured() {
        let client: Arc<dyn ProcessorClient> =
            Arc::new(AuthorizeNetClient::new(config.processor.clone())?);
        match client.authenticate().await {
            Ok(_) => info!("Authorize.net credentials accepted"),
            Err(e) => warn!("Authorize.net authentication failed: {}", e),
        }
    } else {
        warn!("Authorize.net credentials are not configured");
    }

    Ok(())
}

/// Delete audit records older than the retention window
pub async fn purge_audit(config: Config, retention_days: i64) -> anyhow::Result<()> {
    anyhow::ensure!(retention_days > 0, "retention window must be positive");

    let pool = create_pool(&config.database).await?;
    let repo = PgAuditLogRepository::new(Database::new(pool));

    let cutoff = chrono::Utc::now() - chrono::Duration::days(retention_days);
    let purged = repo.purge_before(cutoff).await?;

    info!(
        "Purged {} audit records older than {} days",
        purged, retention_days
    );
    Ok(())
}
