use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Timelike, Utc};
use clap::ValueEnum;
use futures::stream::{self, StreamExt};
use tracing::{error, info, warn};
use uuid::Uuid;

use wardsync_common::{Config, SyncUser};

use crate::chunk::ChunkedFetcher;
use crate::dispatch;
use crate::entity::{self, USERS_PER_SLICE};
use crate::traits::{SessionSource, SyncStore};

/// What happens when the wall-clock budget runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TriggerMode {
    /// Single run; a timeout just ends it.
    OneAndDone,
    /// On timeout, dispatch one follow-up CI run starting a fresh round.
    OneOrMore,
    /// On timeout, dispatch a follow-up that resumes the unfinished round
    /// (same `extracted_at` stamp, only users not yet at it).
    Continuing,
}

#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    pub trigger_mode: TriggerMode,
    /// Wall-clock budget in minutes; 0 disables the timeout.
    pub timeout_mins: u64,
    pub max_workers: usize,
}

#[derive(Debug, Default)]
pub struct SyncStats {
    pub users_synced: usize,
    pub users_failed: usize,
    pub users_skipped: usize,
    pub rows_appended: u64,
    pub timed_out: bool,
    pub followup_dispatched: bool,
}

/// Runs the per-slice sync step across the whole roster with a fixed-size
/// worker pool and an overall wall-clock timeout. Slices are independent:
/// each touches disjoint roster rows, so workers need no coordination
/// beyond the warehouse lease.
///
/// Timeout is handled by process restart, not continuation: an expired
/// budget optionally dispatches a follow-up CI run and exits. In-flight
/// slices are dropped mid-await; their leases expire and are reclaimed.
pub struct SyncDriver<'a> {
    config: &'a Config,
    source: &'a dyn SessionSource,
    store: &'a dyn SyncStore,
    fetcher: ChunkedFetcher,
}

impl<'a> SyncDriver<'a> {
    pub fn new(
        config: &'a Config,
        source: &'a dyn SessionSource,
        store: &'a dyn SyncStore,
    ) -> Self {
        Self {
            config,
            source,
            store,
            fetcher: ChunkedFetcher::new(),
        }
    }

    pub async fn run(&self, opts: SyncOptions) -> Result<SyncStats> {
        let continuing = opts.trigger_mode == TriggerMode::Continuing;

        let extracted_at = self.resolve_extracted_at(continuing).await?;
        let users = self.store.list_sync_users(continuing).await?;
        info!(
            users = users.len(),
            %extracted_at,
            mode = ?opts.trigger_mode,
            "Starting sync round"
        );

        let owner = Uuid::new_v4();
        let mut stats = SyncStats::default();

        let work = self.run_slices(&users, extracted_at, owner, opts.max_workers, &mut stats);
        let timed_out = if opts.timeout_mins > 0 {
            let budget = Duration::from_secs(opts.timeout_mins * 60);
            tokio::time::timeout(budget, work).await.is_err()
        } else {
            work.await;
            false
        };
        stats.timed_out = timed_out;

        if timed_out {
            warn!(
                timeout_mins = opts.timeout_mins,
                "Sync timed out; unfinished leases will expire and be reclaimed"
            );
            if opts.trigger_mode != TriggerMode::OneAndDone && self.config.can_dispatch_workflow() {
                dispatch::dispatch_followup(self.config, opts.timeout_mins).await?;
                stats.followup_dispatched = true;
            }
        }

        info!(
            synced = stats.users_synced,
            failed = stats.users_failed,
            skipped = stats.users_skipped,
            rows = stats.rows_appended,
            timed_out = stats.timed_out,
            "Sync round finished"
        );
        Ok(stats)
    }

    /// The round timestamp. Continuing mode resumes the previous round's
    /// stamp so a restarted run fills in the users that round missed;
    /// otherwise a fresh second-precision timestamp starts a new round.
    async fn resolve_extracted_at(&self, continuing: bool) -> Result<DateTime<Utc>> {
        if continuing {
            if let Some(resumed) = self.store.max_extracted_at().await? {
                return Ok(resumed);
            }
        }
        Ok(Utc::now().with_nanosecond(0).unwrap_or_else(Utc::now))
    }

    async fn run_slices(
        &self,
        users: &[SyncUser],
        extracted_at: DateTime<Utc>,
        owner: Uuid,
        max_workers: usize,
        stats: &mut SyncStats,
    ) {
        let mut outcomes = stream::iter(users.chunks(USERS_PER_SLICE))
            .map(|slice| {
                entity::sync_slice(self.source, self.store, &self.fetcher, slice, extracted_at, owner)
            })
            .buffer_unordered(max_workers.max(1));

        while let Some(result) = outcomes.next().await {
            match result {
                Ok(outcome) => {
                    stats.users_synced += outcome.synced;
                    stats.users_failed += outcome.failed;
                    stats.users_skipped += outcome.skipped;
                    stats.rows_appended += outcome.rows_appended;
                }
                Err(err) => {
                    // A warehouse-side failure for one slice; the other
                    // slices keep going.
                    error!(error = %err, "Slice failed");
                }
            }
        }
    }
}
