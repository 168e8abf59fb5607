// Full sync round against the in-memory mocks: a mixed roster of healthy,
// failing, up-to-date, and already-leased users, driven through the public
// driver API.

use std::collections::HashSet;

use chrono::{Duration, NaiveDate, Utc};
use uuid::Uuid;

use wardsync_common::{Config, Environment, SyncUser};
use wardsync_sync::testing::{MockSource, MockStore};
use wardsync_sync::{SyncDriver, SyncOptions, TriggerMode};

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn test_config() -> Config {
    Config {
        environment: Environment::Dev,
        source_name: "test".into(),
        report_url: "http://localhost".into(),
        report_username: "u".into(),
        report_password: "p".into(),
        database_url: "postgres://localhost/test".into(),
        slack_token: None,
        slack_channel_id: None,
        github_repository: None,
        github_ref_name: None,
        github_workflow_ref: None,
        github_token: None,
        run_url: None,
        bucket_endpoint: None,
        bucket_name: None,
        bucket_access_key_id: None,
        bucket_secret_access_key: None,
        channel_tokens: None,
    }
}

fn user(name: &str, watermark: NaiveDate) -> SyncUser {
    SyncUser {
        username: name.to_string(),
        max_todate: watermark,
        extracted_at: None,
    }
}

#[tokio::test]
async fn mixed_roster_round() {
    let yesterday = Utc::now().date_naive() - Duration::days(1);
    let behind = yesterday - Duration::days(4);

    let users = vec![
        user("healthy", behind),
        user("flaky", behind),
        user("current", yesterday),
        user("taken", behind),
    ];

    let source = MockSource::new()
        .with_daily_rows("healthy", behind + Duration::days(1), yesterday)
        .with_daily_rows("taken", behind + Duration::days(1), yesterday)
        .failing_for("flaky");
    let store = MockStore::new(&users);
    // Another live run holds this user.
    store.lease_to("taken", Uuid::new_v4(), Utc::now() + Duration::hours(1));

    let config = test_config();
    let driver = SyncDriver::new(&config, &source, &store);
    let stats = driver
        .run(SyncOptions {
            trigger_mode: TriggerMode::OneAndDone,
            timeout_mins: 0,
            max_workers: 2,
        })
        .await
        .unwrap();

    assert_eq!(stats.users_synced, 2); // healthy + current
    assert_eq!(stats.users_failed, 1);
    assert_eq!(stats.users_skipped, 1);
    assert_eq!(stats.rows_appended, 4);
    assert!(!stats.timed_out);

    // Healthy user: watermark advanced, lease gone.
    let healthy = store.user_state("healthy");
    assert_eq!(healthy.max_todate, yesterday);
    assert!(healthy.lease_owner.is_none());
    assert!(healthy.extracted_at.is_some());

    // Flaky user: watermark untouched, lease released for the next run.
    let flaky = store.user_state("flaky");
    assert_eq!(flaky.max_todate, behind);
    assert_eq!(flaky.extracted_at, None);
    assert!(flaky.lease_owner.is_none());

    // Leased user: untouched entirely.
    let taken = store.user_state("taken");
    assert_eq!(taken.max_todate, behind);
    assert!(taken.lease_owner.is_some());

    // Appended rows are uniquely hashed and stamped with one round.
    let rows = store.appended_rows();
    let hashes: HashSet<&str> = rows.iter().map(|r| r["md5"].as_str().unwrap()).collect();
    assert_eq!(hashes.len(), rows.len());
    let stamps: HashSet<&str> = rows
        .iter()
        .map(|r| r["_extracted_at"].as_str().unwrap())
        .collect();
    assert_eq!(stamps.len(), 1);
}

#[tokio::test]
async fn rerun_after_round_appends_nothing_new() {
    let yesterday = Utc::now().date_naive() - Duration::days(1);
    let users = vec![user("mlhp1", yesterday - Duration::days(3))];
    let source = MockSource::new().with_daily_rows(
        "mlhp1",
        yesterday - Duration::days(2),
        yesterday,
    );
    let store = MockStore::new(&users);
    let config = test_config();
    let driver = SyncDriver::new(&config, &source, &store);
    let opts = SyncOptions {
        trigger_mode: TriggerMode::OneAndDone,
        timeout_mins: 0,
        max_workers: 1,
    };

    let first = driver.run(opts).await.unwrap();
    assert_eq!(first.rows_appended, 3);

    // Second run: the watermark is at yesterday, so the fetch range is
    // empty and nothing is re-appended.
    let second = driver.run(opts).await.unwrap();
    assert_eq!(second.users_synced, 1);
    assert_eq!(second.rows_appended, 0);
    assert_eq!(store.appended_rows().len(), 3);
}
