use anyhow::{Context, Result};
use sqlx::PgPool;
use tracing::info;

/// Create the warehouse schema if it does not exist. Idempotent; runs at
/// the start of every sync and export.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    let statements = [
        // Sync roster: one row per entity, watermark plus lease columns.
        // The lease replaces the old is_extracting boolean: an owner id and
        // an expiry let a later run reclaim rows left behind by a crash.
        "CREATE TABLE IF NOT EXISTS users (
            username         TEXT PRIMARY KEY,
            profile          JSONB NOT NULL DEFAULT '{}'::jsonb,
            created_at       TIMESTAMPTZ NOT NULL DEFAULT now(),
            max_todate       DATE NOT NULL,
            _extracted_at    TIMESTAMPTZ,
            lease_owner      UUID,
            lease_expires_at TIMESTAMPTZ
        )",
        "CREATE TABLE IF NOT EXISTS sessions (
            username        TEXT,
            payload         JSONB NOT NULL,
            md5             TEXT NOT NULL,
            _extracted_at   TIMESTAMPTZ NOT NULL,
            _extracted_uuid UUID NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS patient_training_sessions (
            username        TEXT,
            payload         JSONB NOT NULL,
            md5             TEXT NOT NULL,
            _extracted_at   TIMESTAMPTZ NOT NULL,
            _extracted_uuid UUID NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS nurse_training_sessions (
            username        TEXT,
            payload         JSONB NOT NULL,
            md5             TEXT NOT NULL,
            _extracted_at   TIMESTAMPTZ NOT NULL,
            _extracted_uuid UUID NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS nurses (
            username        TEXT NOT NULL,
            payload         JSONB NOT NULL,
            md5             TEXT NOT NULL,
            _extracted_at   TIMESTAMPTZ NOT NULL,
            _extracted_uuid UUID NOT NULL
        )",
        // Message attachment metadata, written by the messaging platform's
        // warehouse feed and read by the attachment mirror.
        "CREATE TABLE IF NOT EXISTS message_attachments (
            uri           TEXT NOT NULL,
            channel_phone TEXT NOT NULL,
            direction     TEXT NOT NULL,
            media_type    TEXT NOT NULL,
            mime_type     TEXT,
            inserted_at   TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
        // Dedup and watermark lookups.
        "CREATE INDEX IF NOT EXISTS sessions_md5_idx ON sessions (md5)",
        "CREATE INDEX IF NOT EXISTS nurses_username_idx ON nurses (username)",
        "CREATE INDEX IF NOT EXISTS users_extracted_at_idx ON users (_extracted_at)",
        "CREATE INDEX IF NOT EXISTS message_attachments_inserted_at_idx
             ON message_attachments (inserted_at)",
    ];

    for statement in statements {
        sqlx::query(statement)
            .execute(pool)
            .await
            .context("Migration statement failed")?;
    }

    info!("Warehouse schema up to date");
    Ok(())
}
