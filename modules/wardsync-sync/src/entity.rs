use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Days, NaiveDate, Utc};
use serde_json::Value;
use tracing::{error, info};
use uuid::Uuid;

use wardsync_common::{add_provenance, stamp_content_hash, SyncUser, EXTRACTION_FLOOR};

use crate::chunk::ChunkedFetcher;
use crate::traits::{SessionSource, SyncStore};

/// Users per sync slice. The warehouse caps table appends per day, so rows
/// are appended once per slice rather than once per user.
pub const USERS_PER_SLICE: usize = 10;

/// How long a slice may hold its lease before a later run may reclaim it.
/// Comfortably above the worst observed slice duration.
pub const LEASE_TTL: Duration = Duration::from_secs(60 * 60);

/// The fetch window for one entity: the day after its watermark (never
/// before the extraction floor) through the last full day before
/// `extracted_at`. Empty (`from > to`) when the entity is up to date.
pub fn fetch_window(
    watermark: NaiveDate,
    extracted_at: DateTime<Utc>,
) -> (NaiveDate, NaiveDate) {
    let from = watermark
        .checked_add_days(Days::new(1))
        .unwrap_or(watermark)
        .max(EXTRACTION_FLOOR);
    let to = extracted_at
        .date_naive()
        .checked_sub_days(Days::new(1))
        .unwrap_or_else(|| extracted_at.date_naive());
    (from, to)
}

/// Outcome of syncing one slice of users.
#[derive(Debug, Default)]
pub struct SliceOutcome {
    pub synced: usize,
    pub failed: usize,
    pub skipped: usize,
    pub rows_appended: u64,
}

/// Sync one slice of users: lease, fetch per user, append all new rows,
/// then advance watermarks and clear leases.
///
/// The append and the watermark update are separate statements on purpose:
/// a crash between them re-fetches the same span next run, and the
/// content-hash column deduplicates the re-appended rows downstream.
/// Fetch failures are per-user, not fatal: failed users get their lease
/// released with the watermark unchanged.
pub async fn sync_slice(
    source: &dyn SessionSource,
    store: &dyn SyncStore,
    fetcher: &ChunkedFetcher,
    users: &[SyncUser],
    extracted_at: DateTime<Utc>,
    owner: Uuid,
) -> Result<SliceOutcome> {
    let usernames: Vec<String> = users.iter().map(|u| u.username.clone()).collect();
    let leased = store.acquire_lease(&usernames, owner, LEASE_TTL).await?;

    let mut outcome = SliceOutcome {
        skipped: usernames.len() - leased.len(),
        ..SliceOutcome::default()
    };

    let mut ok_usernames = Vec::new();
    let mut err_usernames = Vec::new();
    let mut new_rows: Vec<Value> = Vec::new();
    let mut todate = None;

    for user in users.iter().filter(|u| leased.contains(&u.username)) {
        let (from, to) = fetch_window(user.max_todate, extracted_at);
        todate = Some(to);
        if from > to {
            // Already up to date: zero-length range, nothing to append.
            ok_usernames.push(user.username.clone());
            continue;
        }

        match fetcher.fetch(source, &user.username, from, to).await {
            Ok(mut rows) => {
                for row in &mut rows {
                    if let Some(obj) = row.as_object_mut() {
                        obj.entry("username")
                            .or_insert_with(|| Value::String(user.username.clone()));
                    }
                }
                stamp_content_hash(&mut rows);
                new_rows.append(&mut rows);
                ok_usernames.push(user.username.clone());
            }
            Err(err) => {
                error!(username = user.username.as_str(), error = %err, "Sync failed for user");
                err_usernames.push(user.username.clone());
            }
        }
    }

    if !new_rows.is_empty() {
        add_provenance(&mut new_rows, extracted_at);
        outcome.rows_appended = store.append_sessions(&new_rows).await?;
    }

    if let (Some(todate), false) = (todate, ok_usernames.is_empty()) {
        store
            .complete_sync(&ok_usernames, todate, extracted_at, owner)
            .await?;
    }
    if !err_usernames.is_empty() {
        store.release_lease(&err_usernames, owner).await?;
    }

    outcome.synced = ok_usernames.len();
    outcome.failed = err_usernames.len();
    info!(
        synced = outcome.synced,
        failed = outcome.failed,
        skipped = outcome.skipped,
        rows = outcome.rows_appended,
        "Slice complete"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockSource, MockStore};
    use chrono::TimeZone;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn ts(y: i32, m: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, day, 0, 0, 0).unwrap()
    }

    fn user(name: &str, watermark: NaiveDate) -> SyncUser {
        SyncUser {
            username: name.to_string(),
            max_todate: watermark,
            extracted_at: None,
        }
    }

    #[test]
    fn window_starts_day_after_watermark_and_ends_yesterday() {
        let (from, to) = fetch_window(d(2024, 1, 10), ts(2024, 1, 15));
        assert_eq!(from, d(2024, 1, 11));
        assert_eq!(to, d(2024, 1, 14));
    }

    #[test]
    fn window_never_starts_before_the_floor() {
        let (from, _) = fetch_window(d(2020, 1, 1), ts(2024, 1, 15));
        assert_eq!(from, EXTRACTION_FLOOR);
    }

    #[test]
    fn up_to_date_watermark_yields_empty_window() {
        let (from, to) = fetch_window(d(2024, 1, 14), ts(2024, 1, 15));
        assert!(from > to);
    }

    #[tokio::test]
    async fn successful_sync_advances_watermark_and_clears_lease() {
        let extracted_at = ts(2024, 1, 15);
        let users = vec![user("mlhp1", d(2024, 1, 10))];
        let source = MockSource::new().with_daily_rows("mlhp1", d(2024, 1, 11), d(2024, 1, 14));
        let store = MockStore::new(&users);
        let fetcher = ChunkedFetcher::without_sleep();
        let owner = Uuid::new_v4();

        let outcome = sync_slice(&source, &store, &fetcher, &users, extracted_at, owner)
            .await
            .unwrap();

        assert_eq!(outcome.synced, 1);
        assert_eq!(outcome.rows_appended, 4);
        let state = store.user_state("mlhp1");
        assert_eq!(state.max_todate, d(2024, 1, 14));
        assert_eq!(state.extracted_at, Some(extracted_at));
        assert!(state.lease_owner.is_none());
    }

    #[tokio::test]
    async fn appended_rows_carry_hash_and_provenance() {
        let extracted_at = ts(2024, 1, 15);
        let users = vec![user("mlhp1", d(2024, 1, 13))];
        let source = MockSource::new().with_daily_rows("mlhp1", d(2024, 1, 14), d(2024, 1, 14));
        let store = MockStore::new(&users);
        let fetcher = ChunkedFetcher::without_sleep();

        sync_slice(&source, &store, &fetcher, &users, extracted_at, Uuid::new_v4())
            .await
            .unwrap();

        let rows = store.appended_rows();
        assert_eq!(rows.len(), 1);
        assert!(rows[0]["md5"].is_string());
        assert!(rows[0]["_extracted_uuid"].is_string());
        assert_eq!(rows[0]["username"], "mlhp1");
    }

    #[tokio::test]
    async fn up_to_date_user_appends_nothing_but_is_stamped() {
        let extracted_at = ts(2024, 1, 15);
        let users = vec![user("mlhp1", d(2024, 1, 14))];
        let source = MockSource::new();
        let store = MockStore::new(&users);
        let fetcher = ChunkedFetcher::without_sleep();

        let outcome = sync_slice(&source, &store, &fetcher, &users, extracted_at, Uuid::new_v4())
            .await
            .unwrap();

        assert_eq!(outcome.synced, 1);
        assert_eq!(outcome.rows_appended, 0);
        assert!(store.appended_rows().is_empty());
        assert_eq!(source.call_count(), 0);
        let state = store.user_state("mlhp1");
        // Watermark unchanged, round stamped.
        assert_eq!(state.max_todate, d(2024, 1, 14));
        assert_eq!(state.extracted_at, Some(extracted_at));
    }

    #[tokio::test]
    async fn failed_user_keeps_watermark_and_loses_lease() {
        let extracted_at = ts(2024, 1, 15);
        let users = vec![
            user("good", d(2024, 1, 10)),
            user("bad", d(2024, 1, 10)),
        ];
        let source = MockSource::new()
            .with_daily_rows("good", d(2024, 1, 11), d(2024, 1, 14))
            .failing_for("bad");
        let store = MockStore::new(&users);
        let fetcher = ChunkedFetcher::without_sleep();

        let outcome = sync_slice(&source, &store, &fetcher, &users, extracted_at, Uuid::new_v4())
            .await
            .unwrap();

        assert_eq!(outcome.synced, 1);
        assert_eq!(outcome.failed, 1);
        let good = store.user_state("good");
        assert_eq!(good.max_todate, d(2024, 1, 14));
        let bad = store.user_state("bad");
        assert_eq!(bad.max_todate, d(2024, 1, 10));
        assert_eq!(bad.extracted_at, None);
        assert!(bad.lease_owner.is_none());
    }

    #[tokio::test]
    async fn leased_users_are_skipped_entirely() {
        let extracted_at = ts(2024, 1, 15);
        let users = vec![user("mlhp1", d(2024, 1, 10))];
        let source = MockSource::new().with_daily_rows("mlhp1", d(2024, 1, 11), d(2024, 1, 14));
        let store = MockStore::new(&users);
        let other_owner = Uuid::new_v4();
        store.lease_to("mlhp1", other_owner, Utc::now() + chrono::Duration::hours(1));
        let fetcher = ChunkedFetcher::without_sleep();

        let outcome = sync_slice(&source, &store, &fetcher, &users, extracted_at, Uuid::new_v4())
            .await
            .unwrap();

        assert_eq!(outcome.skipped, 1);
        assert_eq!(outcome.synced, 0);
        assert_eq!(source.call_count(), 0);
        // The other run's lease is untouched.
        assert_eq!(store.user_state("mlhp1").lease_owner, Some(other_owner));
    }

    #[tokio::test]
    async fn expired_lease_is_reclaimed() {
        let extracted_at = ts(2024, 1, 15);
        let users = vec![user("mlhp1", d(2024, 1, 10))];
        let source = MockSource::new().with_daily_rows("mlhp1", d(2024, 1, 11), d(2024, 1, 14));
        let store = MockStore::new(&users);
        // A crashed run left its lease behind, long expired.
        store.lease_to("mlhp1", Uuid::new_v4(), Utc::now() - chrono::Duration::hours(2));
        let fetcher = ChunkedFetcher::without_sleep();

        let outcome = sync_slice(&source, &store, &fetcher, &users, extracted_at, Uuid::new_v4())
            .await
            .unwrap();

        assert_eq!(outcome.synced, 1);
        assert_eq!(store.user_state("mlhp1").max_todate, d(2024, 1, 14));
    }
}
