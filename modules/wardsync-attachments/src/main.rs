use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use slack_client::{alert_text, SlackClient};
use wardsync_attachments::{
    mirror_attachments, parse_channel_tokens, BucketConfig, BucketStorage, MediaClient,
};
use wardsync_common::{Config, Environment};
use wardsync_warehouse::{migrate, AttachmentRepo};

const SOURCE_NAME: &str = "whatsapp_attachments";

#[derive(Parser)]
#[command(about = "Mirror recent inbound message attachments to object storage")]
struct Args {
    /// How far back to look for attachments, in hours. The default covers
    /// a daily schedule with an hour of slack.
    #[arg(long, default_value_t = 25)]
    past_hours: i32,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("wardsync_attachments=info".parse()?)
                .add_directive("wardsync_warehouse=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = Config::from_env(SOURCE_NAME);
    config.log_redacted();

    let result = run(&config, &args).await;
    if let Err(err) = &result {
        error!(error = %err, "Attachment mirror failed");
        if config.environment == Environment::Prod {
            notify_failure(&config, err).await;
        }
    }
    result
}

async fn run(config: &Config, args: &Args) -> Result<()> {
    let tokens = parse_channel_tokens(
        config
            .channel_tokens
            .as_deref()
            .context("CHANNEL_API_TOKENS is required")?,
    )?;
    let storage = BucketStorage::new(BucketConfig::from_config(config)?);

    let pool = wardsync_warehouse::connect(&config.database_url).await?;
    migrate(&pool).await?;

    let attachments = AttachmentRepo::new(pool).recent_inbound(args.past_hours).await?;
    info!(
        attachments = attachments.len(),
        past_hours = args.past_hours,
        "Mirroring recent inbound attachments"
    );

    let downloader = MediaClient::new(tokens);
    mirror_attachments(&attachments, &downloader, &storage).await?;
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
