use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{info, warn};

use wardsync_common::MessageAttachment;

/// Downloads one attachment from the messaging platform. `Ok(None)` means
/// the attachment is not retrievable (no credentials for its channel, or
/// the platform no longer serves it) and is skipped; transport errors
/// propagate and fail the run.
#[async_trait]
pub trait MediaDownloader: Send + Sync {
    async fn download(&self, attachment: &MessageAttachment) -> Result<Option<Vec<u8>>>;
}

/// Destination bucket for mirrored attachments.
#[async_trait]
pub trait ObjectSink: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: Option<&str>) -> Result<()>;
}

/// Messaging API media client. Media URLs are only readable with the
/// bearer token of the channel the message arrived on, so the client
/// carries one token per channel phone number.
pub struct MediaClient {
    client: reqwest::Client,
    tokens: HashMap<String, String>,
}

impl MediaClient {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            tokens,
        }
    }
}

#[async_trait]
impl MediaDownloader for MediaClient {
    async fn download(&self, attachment: &MessageAttachment) -> Result<Option<Vec<u8>>> {
        let Some(token) = self.tokens.get(&attachment.channel_phone) else {
            warn!(
                channel = attachment.channel_phone.as_str(),
                uri = attachment.uri.as_str(),
                "No token configured for channel, skipping attachment"
            );
            return Ok(None);
        };

        let resp = self
            .client
            .get(&attachment.uri)
            .bearer_auth(token)
            .send()
            .await
            .with_context(|| format!("media download failed for {}", attachment.uri))?;

        let status = resp.status();
        if !status.is_success() {
            warn!(
                uri = attachment.uri.as_str(),
                status = status.as_u16(),
                "Attachment not served, skipping"
            );
            return Ok(None);
        }
        Ok(Some(resp.bytes().await?.to_vec()))
    }
}

/// Parse the channel-token map from its JSON environment payload,
/// an object of `{"<channel phone>": "<bearer token>"}`.
pub fn parse_channel_tokens(raw: &str) -> Result<HashMap<String, String>> {
    serde_json::from_str(raw).context("CHANNEL_API_TOKENS is not a JSON string map")
}

/// Bucket key for one attachment: `{media_type}/{filename}`, where the
/// filename is the last path segment of the media URI. Platform URIs often
/// lack an extension, in which case one is derived from the MIME type.
/// None when the URI has no usable final segment.
pub fn object_key(attachment: &MessageAttachment) -> Option<String> {
    let filename = attachment
        .uri
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())?;

    let filename = if filename.contains('.') {
        filename.to_string()
    } else {
        let ext = attachment
            .mime_type
            .as_deref()
            .and_then(|mime| mime_guess::get_mime_extensions_str(mime))
            .and_then(|exts| exts.first());
        match ext {
            Some(ext) => format!("{filename}.{ext}"),
            None => filename.to_string(),
        }
    };

    Some(format!("{}/{filename}", attachment.media_type))
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct MirrorStats {
    pub uploaded: usize,
    pub skipped: usize,
}

/// Mirror a batch of attachments into the bucket, one at a time; the
/// platform rate-limits media downloads well below anything parallelism
/// would gain. Unretrievable attachments are counted and skipped, download
/// or upload transport failures abort the run.
pub async fn mirror_attachments(
    attachments: &[MessageAttachment],
    downloader: &dyn MediaDownloader,
    sink: &dyn ObjectSink,
) -> Result<MirrorStats> {
    let mut stats = MirrorStats::default();

    for attachment in attachments {
        let Some(key) = object_key(attachment) else {
            warn!(uri = attachment.uri.as_str(), "No usable filename in URI, skipping");
            stats.skipped += 1;
            continue;
        };
        let Some(bytes) = downloader.download(attachment).await? else {
            stats.skipped += 1;
            continue;
        };
        sink.put(&key, bytes, attachment.mime_type.as_deref()).await?;
        stats.uploaded += 1;
    }

    info!(
        uploaded = stats.uploaded,
        skipped = stats.skipped,
        "Attachment mirror finished"
    );
    Ok(stats)
}
