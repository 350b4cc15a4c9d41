use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rmsw_core::SyncType;
use rmsw_storage::PgStore;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "rmsw-cli")]
#[command(about = "Current RMS watcher: webhook intake, forecasting and sync")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the JSON API (default).
    Serve,
    /// Copy opportunities from Current RMS once and exit.
    Sync {
        /// Only fetch records changed since the last completed run.
        #[arg(long)]
        incremental: bool,
    },
    /// Apply database migrations to DATABASE_URL.
    Migrate,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => rmsw_web::serve_from_env().await?,
        Commands::Sync { incremental } => {
            let sync_type = if incremental {
                SyncType::IncrementalSync
            } else {
                SyncType::InitialSync
            };
            let outcome = rmsw_sync::run_sync_once_from_env(sync_type).await?;
            let run = &outcome.run;
            println!(
                "sync {}: run_id={} type={} synced={} failed={} duration={}s",
                run.status.as_str(),
                run.id,
                run.sync_type.as_str(),
                run.records_synced,
                run.records_failed,
                outcome.duration_secs.unwrap_or_default()
            );
            if !outcome.succeeded() {
                bail!(
                    "sync failed: {}",
                    run.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
        Commands::Migrate => {
            let url = std::env::var("DATABASE_URL")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .context("DATABASE_URL must be set to run migrations")?;
            let store = PgStore::connect(&url).await?;
            store.migrate().await?;
            info!("migrations applied");
        }
    }

    Ok(())
}
