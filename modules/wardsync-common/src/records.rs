use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::hash::content_hash;

/// One row of the `users` sync roster: entity identifier plus watermark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncUser {
    pub username: String,
    /// Last successfully synced end date (inclusive).
    pub max_todate: NaiveDate,
    /// When this user last completed a sync round. None before first sync.
    pub extracted_at: Option<DateTime<Utc>>,
}

/// One inbound message attachment, as recorded by the messaging platform's
/// warehouse feed. Mirrored from the platform's media URL to object
/// storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageAttachment {
    pub uri: String,
    /// The channel (WhatsApp line) the attachment arrived on; selects the
    /// API credentials used to download it.
    pub channel_phone: String,
    pub media_type: String,
    pub mime_type: Option<String>,
}

/// Stamp each record with its content hash, computed over the payload as
/// fetched (before provenance columns are added, so re-fetches of the same
/// upstream record hash identically).
pub fn stamp_content_hash(rows: &mut [Value]) {
    for row in rows.iter_mut() {
        let hash = content_hash(row);
        if let Some(obj) = row.as_object_mut() {
            obj.insert("md5".to_string(), Value::String(hash));
        }
    }
}

/// Add the extraction provenance columns carried by every warehouse table.
pub fn add_provenance(rows: &mut [Value], extracted_at: DateTime<Utc>) {
    let ts = extracted_at.to_rfc3339_opts(SecondsFormat::Secs, true);
    for row in rows.iter_mut() {
        if let Some(obj) = row.as_object_mut() {
            obj.insert("_extracted_at".to_string(), Value::String(ts.clone()));
            obj.insert(
                "_extracted_uuid".to_string(),
                Value::String(Uuid::new_v4().to_string()),
            );
        }
    }
}
