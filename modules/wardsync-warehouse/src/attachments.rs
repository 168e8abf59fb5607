use anyhow::Result;
use sqlx::{PgPool, Row};
use tracing::debug;

use wardsync_common::MessageAttachment;

/// Media types with no downloadable payload behind their URI.
const SKIPPED_MEDIA_TYPES: [&str; 2] = ["location", "sticker"];

/// Read side of the `message_attachments` table. The rows are written by
/// the messaging platform's warehouse feed; this repo only selects the
/// recent inbound ones for mirroring.
#[derive(Clone)]
pub struct AttachmentRepo {
    pool: PgPool,
}

impl AttachmentRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inbound attachments inserted within the last `past_hours` hours,
    /// ordered by channel so per-channel credentials stay warm in
    /// sequence. Location pins and stickers carry no media to download.
    pub async fn recent_inbound(&self, past_hours: i32) -> Result<Vec<MessageAttachment>> {
        let rows = sqlx::query(
            "SELECT uri, channel_phone, media_type, mime_type
             FROM message_attachments
             WHERE inserted_at >= now() - make_interval(hours => $1)
               AND direction = 'inbound'
               AND media_type != ALL($2)
             ORDER BY channel_phone",
        )
        .bind(past_hours)
        .bind(&SKIPPED_MEDIA_TYPES[..])
        .fetch_all(&self.pool)
        .await?;

        let attachments: Vec<MessageAttachment> = rows
            .into_iter()
            .map(|row| MessageAttachment {
                uri: row.get("uri"),
                channel_phone: row.get("channel_phone"),
                media_type: row.get("media_type"),
                mime_type: row.get("mime_type"),
            })
            .collect();
        debug!(count = attachments.len(), past_hours, "Listed recent inbound attachments");
        Ok(attachments)
    }
}
