use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use report_client::ReportClient;
use slack_client::{alert_text, SlackClient};
use wardsync_common::{Config, Environment};
use wardsync_sync::{SyncDriver, SyncOptions, TriggerMode, WarehouseSyncStore};
use wardsync_warehouse::{migrate, WarehouseStore, WatermarkRepo};

const SOURCE_NAME: &str = "andhra_pradesh_mlhp";

#[derive(Parser)]
#[command(about = "Incremental session sync for the reporting API")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Wall-clock budget in minutes; 0 disables the timeout.
    #[arg(long, default_value_t = 5)]
    timeout_mins: u64,

    #[arg(long, value_enum, default_value_t = TriggerMode::OneAndDone)]
    trigger_mode: TriggerMode,

    #[arg(long, default_value_t = 4)]
    max_workers: usize,
}

#[derive(Subcommand)]
enum Command {
    /// Seed the sync roster from a JSON file of user records.
    /// Fails if the roster already has rows.
    SeedUsers {
        #[arg(long)]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("wardsync_sync=info".parse()?)
                .add_directive("wardsync_warehouse=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = Config::from_env(SOURCE_NAME);
    config.log_redacted();

    let result = run(&config, &args).await;
    if let Err(err) = &result {
        error!(error = %err, "Sync run failed");
        if config.environment == Environment::Prod {
            notify_failure(&config, err).await;
        }
    }
    result
}

async fn run(config: &Config, args: &Args) -> Result<()> {
    let pool = wardsync_warehouse::connect(&config.database_url).await?;
    migrate(&pool).await?;
    let store = WarehouseStore::new(pool.clone());

    if let Some(Command::SeedUsers { path }) = &args.command {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let users: Vec<serde_json::Value> =
            serde_json::from_str(&raw).context("Roster file is not a JSON array")?;
        let seeded = store.seed_users(&users).await?;
        info!(seeded, "Roster seed complete");
        return Ok(());
    }

    let client = ReportClient::new(
        &config.report_url,
        &config.report_username,
        &config.report_password,
    );
    client.login().await?;

    let sync_store = WarehouseSyncStore::new(WatermarkRepo::new(pool), store);
    let driver = SyncDriver::new(config, &client, &sync_store);
    let stats = driver
        .run(SyncOptions {
            trigger_mode: args.trigger_mode,
            timeout_mins: args.timeout_mins,
            max_workers: args.max_workers,
        })
        .await?;

    if stats.users_failed > 0 {
        // Per-user failures are logged and retried next run from the same
        // watermark; they don't fail the process.
        info!(failed = stats.users_failed, "Some users will retry next run");
    }
    Ok(())
}

async fn notify_failure(config: &Config, err: &anyhow::Error) {
    let (Some(token), Some(channel)) = (&config.slack_token, &config.slack_channel_id) else {
        return;
    };
    let text = alert_text(&config.source_name, &err.to_string(), config.run_url.as_deref());
    if let Err(notify_err) = SlackClient::new(token.clone()).post_message(channel, &text).await {
        error!(error = %notify_err, "Failed to post failure alert");
    }
}
