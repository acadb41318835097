use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fliptrack_storage::PgStore;
use fliptrack_sync::SyncConfig;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "fliptrack-cli")]
#[command(about = "Fliptrack command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Sync every enabled market, or a single one with --market.
    Sync {
        #[arg(long)]
        market: Option<String>,
    },
    /// Apply pending database migrations.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Sync { market: None }) {
        Commands::Sync { market } => {
            let summaries =
                fliptrack_sync::sync_enabled_markets_from_env(market.as_deref()).await?;
            for summary in &summaries {
                println!(
                    "{}: success={} run_id={} processed={} inserted={} updated={} batches_failed={}",
                    summary.market,
                    summary.success,
                    summary.run_id,
                    summary.total_processed,
                    summary.total_inserted,
                    summary.total_updated,
                    summary.batches_failed
                );
            }
            if summaries.iter().any(|s| !s.success) {
                anyhow::bail!("one or more markets failed to sync");
            }
        }
        Commands::Migrate => {
            let config = SyncConfig::from_env();
            let store = PgStore::connect(&config.database_url)
                .await
                .context("connecting to database")?;
            store.migrate().await.context("running migrations")?;
            println!("migrations applied");
        }
    }

    Ok(())
}
