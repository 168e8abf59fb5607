// Trait abstractions for the sync loop's two external dependencies.
//
// SessionSource — the reporting API's per-entity date-range fetch.
// SyncStore — the warehouse side: roster, leases, watermarks, appends.
//
// These enable deterministic testing with MockSource and MockStore:
// no network, no database.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use uuid::Uuid;

use report_client::ReportClient;
use wardsync_common::SyncUser;
use wardsync_warehouse::{Disposition, WarehouseStore, WatermarkRepo};

#[async_trait]
pub trait SessionSource: Send + Sync {
    /// Session records for one entity across an inclusive date range.
    async fn sessions(&self, username: &str, from: NaiveDate, to: NaiveDate)
        -> Result<Vec<Value>>;
}

#[async_trait]
impl SessionSource for ReportClient {
    async fn sessions(
        &self,
        username: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Value>> {
        Ok(ReportClient::sessions(self, username, from, to).await?)
    }
}

#[async_trait]
pub trait SyncStore: Send + Sync {
    async fn list_sync_users(&self, continuing: bool) -> Result<Vec<SyncUser>>;

    async fn max_extracted_at(&self) -> Result<Option<DateTime<Utc>>>;

    /// Lease users to `owner`; returns the usernames actually acquired.
    async fn acquire_lease(
        &self,
        usernames: &[String],
        owner: Uuid,
        ttl: Duration,
    ) -> Result<Vec<String>>;

    /// Append session rows (already carrying hash + provenance columns).
    async fn append_sessions(&self, rows: &[Value]) -> Result<u64>;

    /// Advance watermarks and clear leases for a completed slice.
    async fn complete_sync(
        &self,
        usernames: &[String],
        todate: NaiveDate,
        extracted_at: DateTime<Utc>,
        owner: Uuid,
    ) -> Result<()>;

    /// Clear leases without advancing watermarks (failure path).
    async fn release_lease(&self, usernames: &[String], owner: Uuid) -> Result<()>;
}

/// Production store: watermark repo plus record-table loads, both on the
/// same Postgres pool.
pub struct WarehouseSyncStore {
    repo: WatermarkRepo,
    store: WarehouseStore,
}

impl WarehouseSyncStore {
    pub fn new(repo: WatermarkRepo, store: WarehouseStore) -> Self {
        Self { repo, store }
    }
}

#[async_trait]
impl SyncStore for WarehouseSyncStore {
    async fn list_sync_users(&self, continuing: bool) -> Result<Vec<SyncUser>> {
        self.repo.list_sync_users(continuing).await
    }

    async fn max_extracted_at(&self) -> Result<Option<DateTime<Utc>>> {
        self.repo.max_extracted_at().await
    }

    async fn acquire_lease(
        &self,
        usernames: &[String],
        owner: Uuid,
        ttl: Duration,
    ) -> Result<Vec<String>> {
        self.repo.acquire_lease(usernames, owner, ttl).await
    }

    async fn append_sessions(&self, rows: &[Value]) -> Result<u64> {
        self.store.load("sessions", rows, Disposition::Append).await
    }

    async fn complete_sync(
        &self,
        usernames: &[String],
        todate: NaiveDate,
        extracted_at: DateTime<Utc>,
        owner: Uuid,
    ) -> Result<()> {
        self.repo
            .complete_sync(usernames, todate, extracted_at, owner)
            .await?;
        Ok(())
    }

    async fn release_lease(&self, usernames: &[String], owner: Uuid) -> Result<()> {
        self.repo.release_lease(usernames, owner).await?;
        Ok(())
    }
}
