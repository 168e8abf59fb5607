// Test mocks for the sync loop's two trait boundaries:
// - MockSource (SessionSource) — scripted per-user rows with optional
//   window-size and per-user failure modes
// - MockStore (SyncStore) — stateful in-memory roster with lease semantics
//   mirroring the warehouse repo

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use wardsync_common::SyncUser;

use crate::traits::{SessionSource, SyncStore};

// ---------------------------------------------------------------------------
// MockSource
// ---------------------------------------------------------------------------

/// Scripted session source. Returns registered rows whose date falls in
/// the requested window. Builder pattern: `.with_daily_rows()`,
/// `.failing_above_days()`, `.failing_for()`.
pub struct MockSource {
    rows: HashMap<String, Vec<(NaiveDate, Value)>>,
    max_window_days: Option<i64>,
    failing_users: HashSet<String>,
    calls: AtomicUsize,
}

impl Default for MockSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSource {
    pub fn new() -> Self {
        Self {
            rows: HashMap::new(),
            max_window_days: None,
            failing_users: HashSet::new(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Register one row per day over an inclusive range.
    pub fn with_daily_rows(mut self, username: &str, from: NaiveDate, to: NaiveDate) -> Self {
        let entry = self.rows.entry(username.to_string()).or_default();
        let mut date = from;
        let mut id = entry.len() as i64;
        while date <= to {
            entry.push((
                date,
                json!({ "id": id, "session_date": date.format("%Y-%m-%d").to_string() }),
            ));
            id += 1;
            date = match date.checked_add_days(Days::new(1)) {
                Some(next) => next,
                None => break,
            };
        }
        self
    }

    pub fn with_rows(mut self, username: &str, rows: Vec<(NaiveDate, Value)>) -> Self {
        self.rows.entry(username.to_string()).or_default().extend(rows);
        self
    }

    /// Fail any request whose window spans more than `days` days.
    pub fn failing_above_days(mut self, days: i64) -> Self {
        self.max_window_days = Some(days);
        self
    }

    /// Fail every request for one user.
    pub fn failing_for(mut self, username: &str) -> Self {
        self.failing_users.insert(username.to_string());
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionSource for MockSource {
    async fn sessions(
        &self,
        username: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Value>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.failing_users.contains(username) {
            bail!("scripted failure for {username}");
        }
        if let Some(max) = self.max_window_days {
            let span = (to - from).num_days() + 1;
            if span > max {
                bail!("window too large: {span} days");
            }
        }

        Ok(self
            .rows
            .get(username)
            .map(|rows| {
                rows.iter()
                    .filter(|(date, _)| *date >= from && *date <= to)
                    .map(|(_, row)| row.clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// MockStore
// ---------------------------------------------------------------------------

/// In-memory sync state for one user, mirroring the `users` table columns.
#[derive(Debug, Clone)]
pub struct UserState {
    pub max_todate: NaiveDate,
    pub extracted_at: Option<DateTime<Utc>>,
    pub lease_owner: Option<Uuid>,
    pub lease_expires_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct StoreInner {
    users: HashMap<String, UserState>,
    appended: Vec<Value>,
}

/// Stateful in-memory SyncStore with the same lease semantics as the
/// warehouse repo: unleased or expired rows are acquirable, live leases
/// held by another owner are not.
pub struct MockStore {
    inner: Mutex<StoreInner>,
}

impl MockStore {
    pub fn new(users: &[SyncUser]) -> Self {
        let users = users
            .iter()
            .map(|u| {
                (
                    u.username.clone(),
                    UserState {
                        max_todate: u.max_todate,
                        extracted_at: u.extracted_at,
                        lease_owner: None,
                        lease_expires_at: None,
                    },
                )
            })
            .collect();
        Self {
            inner: Mutex::new(StoreInner {
                users,
                appended: Vec::new(),
            }),
        }
    }

    pub fn user_state(&self, username: &str) -> UserState {
        self.inner
            .lock()
            .unwrap()
            .users
            .get(username)
            .cloned()
            .expect("unknown user in MockStore")
    }

    pub fn appended_rows(&self) -> Vec<Value> {
        self.inner.lock().unwrap().appended.clone()
    }

    /// Pre-lease a user, as if another run (live or crashed) holds it.
    pub fn lease_to(&self, username: &str, owner: Uuid, expires_at: DateTime<Utc>) {
        let mut inner = self.inner.lock().unwrap();
        let state = inner.users.get_mut(username).expect("unknown user");
        state.lease_owner = Some(owner);
        state.lease_expires_at = Some(expires_at);
    }
}

#[async_trait]
impl SyncStore for MockStore {
    async fn list_sync_users(&self, continuing: bool) -> Result<Vec<SyncUser>> {
        let inner = self.inner.lock().unwrap();
        let latest = inner.users.values().filter_map(|s| s.extracted_at).max();
        let mut users: Vec<SyncUser> = inner
            .users
            .iter()
            .filter(|(_, state)| {
                !continuing || latest.is_none() || state.extracted_at != latest
            })
            .map(|(name, state)| SyncUser {
                username: name.clone(),
                max_todate: state.max_todate,
                extracted_at: state.extracted_at,
            })
            .collect();
        users.sort_by(|a, b| {
            (a.extracted_at, &a.username).cmp(&(b.extracted_at, &b.username))
        });
        Ok(users)
    }

    async fn max_extracted_at(&self) -> Result<Option<DateTime<Utc>>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.users.values().filter_map(|s| s.extracted_at).max())
    }

    async fn acquire_lease(
        &self,
        usernames: &[String],
        owner: Uuid,
        ttl: Duration,
    ) -> Result<Vec<String>> {
        let now = Utc::now();
        let expires_at = now + chrono::Duration::from_std(ttl)?;
        let mut inner = self.inner.lock().unwrap();
        let mut acquired = Vec::new();
        for name in usernames {
            if let Some(state) = inner.users.get_mut(name) {
                let free = match (state.lease_owner, state.lease_expires_at) {
                    (None, _) => true,
                    (Some(_), Some(expiry)) => expiry < now,
                    (Some(_), None) => false,
                };
                if free {
                    state.lease_owner = Some(owner);
                    state.lease_expires_at = Some(expires_at);
                    acquired.push(name.clone());
                }
            }
        }
        Ok(acquired)
    }

    async fn append_sessions(&self, rows: &[Value]) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        inner.appended.extend_from_slice(rows);
        Ok(rows.len() as u64)
    }

    async fn complete_sync(
        &self,
        usernames: &[String],
        todate: NaiveDate,
        extracted_at: DateTime<Utc>,
        owner: Uuid,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        for name in usernames {
            if let Some(state) = inner.users.get_mut(name) {
                if state.lease_owner == Some(owner) {
                    state.max_todate = state.max_todate.max(todate);
                    state.extracted_at = Some(extracted_at);
                    state.lease_owner = None;
                    state.lease_expires_at = None;
                }
            }
        }
        Ok(())
    }

    async fn release_lease(&self, usernames: &[String], owner: Uuid) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        for name in usernames {
            if let Some(state) = inner.users.get_mut(name) {
                if state.lease_owner == Some(owner) {
                    state.lease_owner = None;
                    state.lease_expires_at = None;
                }
            }
        }
        Ok(())
    }
}
