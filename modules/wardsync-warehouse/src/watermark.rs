use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use wardsync_common::SyncUser;

use crate::store::exec_with_retry;

/// Per-entity sync state: watermarks plus the sync lease.
///
/// The lease is the replacement for the old advisory `is_extracting` flag:
/// each acquisition writes an owner id and an expiry, and acquisition
/// treats an expired lease as free, so rows stuck by a crashed run are
/// reclaimed on the next run instead of needing manual cleanup.
#[derive(Clone)]
pub struct WatermarkRepo {
    pool: PgPool,
}

impl WatermarkRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The sync roster, ordered so the least recently synced users come
    /// first. In continuing mode, users already stamped with the latest
    /// `_extracted_at` round are filtered out so a follow-up run picks up
    /// where the timed-out run stopped.
    pub async fn list_sync_users(&self, continuing: bool) -> Result<Vec<SyncUser>> {
        let mut sql = String::from("SELECT username, max_todate, _extracted_at FROM users");
        if continuing {
            sql.push_str(
                " WHERE _extracted_at IS NULL
                     OR _extracted_at != (SELECT max(_extracted_at) FROM users)",
            );
        }
        sql.push_str(" ORDER BY _extracted_at ASC NULLS FIRST, username ASC");

        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|row| SyncUser {
                username: row.get("username"),
                max_todate: row.get("max_todate"),
                extracted_at: row.get("_extracted_at"),
            })
            .collect())
    }

    /// The latest completed round's timestamp; the resume point for
    /// continuing mode. None before the first completed sync.
    pub async fn max_extracted_at(&self) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query("SELECT max(_extracted_at) AS latest FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("latest"))
    }

    /// Lease a set of users to `owner` for `ttl`. Rows whose lease is held
    /// by a live owner are skipped; expired leases are reclaimed. Returns
    /// the usernames actually acquired.
    pub async fn acquire_lease(
        &self,
        usernames: &[String],
        owner: Uuid,
        ttl: Duration,
    ) -> Result<Vec<String>> {
        let expires_at = Utc::now() + chrono::Duration::from_std(ttl)?;
        let acquired: Vec<String> = exec_with_retry(|| async {
            let rows = sqlx::query(
                "UPDATE users
                 SET lease_owner = $1, lease_expires_at = $2
                 WHERE username = ANY($3)
                   AND (lease_owner IS NULL OR lease_expires_at < now())
                 RETURNING username",
            )
            .bind(owner)
            .bind(expires_at)
            .bind(usernames)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows.into_iter().map(|r| r.get("username")).collect())
        })
        .await?;

        if acquired.len() < usernames.len() {
            debug!(
                requested = usernames.len(),
                acquired = acquired.len(),
                "Some users are leased by another run, skipping them"
            );
        }
        Ok(acquired)
    }

    /// Record a successful sync round for `usernames`: advance the
    /// watermark (never backwards), stamp `_extracted_at`, clear the lease.
    /// Only rows still leased to `owner` are touched.
    pub async fn complete_sync(
        &self,
        usernames: &[String],
        todate: NaiveDate,
        extracted_at: DateTime<Utc>,
        owner: Uuid,
    ) -> Result<u64> {
        let updated = exec_with_retry(|| async {
            let result = sqlx::query(
                "UPDATE users
                 SET max_todate = GREATEST(max_todate, $1),
                     _extracted_at = $2,
                     lease_owner = NULL,
                     lease_expires_at = NULL
                 WHERE username = ANY($3) AND lease_owner = $4",
            )
            .bind(todate)
            .bind(extracted_at)
            .bind(usernames)
            .bind(owner)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        })
        .await?;

        info!(users = updated, %todate, "Watermarks advanced");
        Ok(updated)
    }

    /// Clear the lease without advancing the watermark (the failure path:
    /// these users will be re-fetched from the same watermark next run).
    pub async fn release_lease(&self, usernames: &[String], owner: Uuid) -> Result<u64> {
        let released = exec_with_retry(|| async {
            let result = sqlx::query(
                "UPDATE users
                 SET lease_owner = NULL, lease_expires_at = NULL
                 WHERE username = ANY($1) AND lease_owner = $2",
            )
            .bind(usernames)
            .bind(owner)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        })
        .await?;
        Ok(released)
    }
}
