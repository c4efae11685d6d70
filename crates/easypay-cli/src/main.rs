mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "easypay", version, about = "EasyPay payment gateway service")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the API server and background workers
    Serve,

    /// Apply pending database migrations and exit
    Migrate,

    /// Validate configuration and probe the database and processor
    Check,

    /// Delete audit records past the retention window
    PurgeAudit {
        /// Retention window in days
        #[arg(long, default_value_t = 90)]
        retention_days: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = easypay_core::Config::from_env()?;

    match cli.command {
        Commands::Serve => commands::serve(config).await?,
        Commands::Migrate => commands::migrate(config).await?,
        Commands::Check => commands::check(config).await?,
        Commands::PurgeAudit { retention_days } => {
            commands::purge_audit(config, retention_days).await?
        }
    }

    Ok(())
}
