use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Datelike;
use clap::{Parser, Subcommand};
use otd_core::TargetDay;
use otd_storage::{EventStore, PgEventStore};
use otd_sync::{maybe_build_scheduler, SyncConfig, SyncPipeline};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "otd-cli")]
#[command(about = "Harvests \"On this day\" events into the event store")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Harvest and reconcile one day, or the whole year when no target is given.
    Sync {
        /// Day to harvest, as MM-DD.
        #[arg(short, long)]
        target: Option<TargetDay>,
        /// Save the changes. Without this flag the run is rolled back.
        #[arg(short, long)]
        commit: bool,
    },
    /// Apply pending database migrations.
    Migrate,
    /// Print stored events for a day, today by default.
    Show {
        #[arg(short, long)]
        target: Option<TargetDay>,
    },
    /// Run scheduled harvests until interrupted.
    Schedule,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Sync {
        target: None,
        commit: false,
    });

    match command {
        Commands::Sync { target, commit } => {
            let report = otd_sync::run_sync_once_from_env(target, commit).await?;
            println!("{}", report.summary_line());
            if let Some(outcome) = report.outcome {
                println!("run {}: {outcome}", report.run_id);
            }
        }
        Commands::Migrate => {
            let config = SyncConfig::from_env();
            let store =
                PgEventStore::connect(&config.database_url, config.database_max_connections)
                    .await?;
            store.migrate().await?;
            println!("migrations applied");
        }
        Commands::Show { target } => {
            let config = SyncConfig::from_env();
            let day = target.unwrap_or_else(TargetDay::today);
            let store =
                PgEventStore::connect(&config.database_url, config.database_max_connections)
                    .await?;
            let events = store.events_on_day(day).await?;
            println!("On this day, {}:", day.label());
            if events.is_empty() {
                println!("  no events stored");
            }
            for event in events {
                println!("  {} – {}", event.date.year(), event.description);
            }
        }
        Commands::Schedule => {
            let config = SyncConfig::from_env();
            let pipeline = Arc::new(SyncPipeline::from_config(config).await?);
            let Some(mut sched) = maybe_build_scheduler(Arc::clone(&pipeline)).await? else {
                anyhow::bail!("scheduler is disabled; set OTD_SCHEDULER_ENABLED=true");
            };
            sched.start().await.context("starting scheduler")?;
            info!(cron = %pipeline.config().sync_cron, "scheduler running; press Ctrl-C to stop");
            tokio::signal::ctrl_c()
                .await
                .context("waiting for shutdown signal")?;
            sched.shutdown().await.context("stopping scheduler")?;
            info!("scheduler stopped");
        }
    }

    Ok(())
}
