use std::path::PathBuf;

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use report_client::ReportClient;
use slack_client::{alert_text, SlackClient};
use wardsync_common::{Config, Environment};
use wardsync_export::{
    load_warehouse, local_window, warehouse_window, write_local, ExportPipeline, ExportWindow,
};
use wardsync_warehouse::{migrate, WarehouseStore};

const SOURCE_NAME: &str = "andhra_pradesh_ccp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Destination {
    Warehouse,
    Local,
}

#[derive(Parser)]
#[command(about = "Extract and load for the training report API")]
struct Args {
    /// Destination to write the data.
    #[arg(long, value_enum, default_value_t = Destination::Warehouse)]
    dest: Destination,

    /// Start date (YYYY-MM-DD). Only used if --dest=local.
    #[arg(long)]
    start_date: Option<NaiveDate>,

    /// End date (YYYY-MM-DD). Only used if --dest=local.
    #[arg(long)]
    end_date: Option<NaiveDate>,

    /// Output directory for --dest=local.
    #[arg(long, default_value = "data")]
    out_dir: PathBuf,

    /// Parallel per-day API calls.
    #[arg(long, default_value_t = 8)]
    workers: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("wardsync_export=info".parse()?)
                .add_directive("wardsync_warehouse=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = Config::from_env(SOURCE_NAME);
    config.log_redacted();

    let result = run(&config, &args).await;
    if let Err(err) = &result {
        error!(error = %err, "Export run failed");
        if config.environment == Environment::Prod {
            notify_failure(&config, err).await;
        }
    }
    result
}

async fn run(config: &Config, args: &Args) -> Result<()> {
    let today = Utc::now().date_naive();

    // Warehouse destination needs the store both for window resolution
    // (overlap from the latest loaded session) and for the load itself.
    let store = match args.dest {
        Destination::Warehouse => {
            let pool = wardsync_warehouse::connect(&config.database_url).await?;
            migrate(&pool).await?;
            Some(WarehouseStore::new(pool))
        }
        Destination::Local => None,
    };

    let window = match &store {
        Some(store) => {
            let max_loaded = store
                .max_session_date("patient_training_sessions", "date_of_session")
                .await?;
            warehouse_window(today, max_loaded)
        }
        None => local_window(today, args.start_date, args.end_date),
    };
    window.validate(today)?;
    info!(
        start = %window.start,
        end = %window.end,
        "Attempting to fetch data between these dates, inclusive"
    );

    let client = ReportClient::new(
        &config.report_url,
        &config.report_username,
        &config.report_password,
    );
    client.login().await?;

    let pipeline = ExportPipeline::new(&client, args.workers);
    let Some(data) = pipeline.fetch(window).await? else {
        return Ok(());
    };

    match store {
        Some(store) => {
            let extracted_at = Utc::now();
            load_warehouse(&store, data, extracted_at).await?;
        }
        None => {
            let paths = write_local(&data, &args.out_dir).await?;
            upload_artifacts(config, &paths, window).await;
        }
    }
    Ok(())
}

/// Upload local export files to Slack when a channel is configured.
/// Upload failures are logged, not fatal: the files are already on disk.
async fn upload_artifacts(config: &Config, paths: &[PathBuf], window: ExportWindow) {
    let (Some(token), Some(channel)) = (&config.slack_token, &config.slack_channel_id) else {
        return;
    };
    let slack = SlackClient::new(token.clone());
    let caption = format!(
        "Export for *{}* covering {} to {}.",
        config.source_name, window.start, window.end
    );
    for path in paths {
        if let Err(err) = slack.upload_file(channel, path, &caption).await {
            error!(error = %err, path = %path.display(), "Failed to upload export file");
        }
    }
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
