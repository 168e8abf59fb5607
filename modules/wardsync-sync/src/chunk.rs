use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use serde_json::Value;
use tracing::{info, warn};

use wardsync_common::{candidate_chunk_sizes, date_chunks};

use crate::traits::SessionSource;

/// Pause before retrying the span at a smaller chunk size. The upstream
/// API needs a moment after a failure.
const DOWNSHIFT_SLEEP: Duration = Duration::from_secs(3);

/// Fetches a date span in chunks, downshifting to smaller chunk sizes
/// until one size succeeds end-to-end.
///
/// Any window failure aborts the current size and restarts the whole span
/// at the next smaller size — no partial progress is kept across sizes, so
/// a successful fetch is always the union of one size's windows (no gaps,
/// no duplicates). When the smallest size also fails, the last error
/// propagates and no data is returned.
pub struct ChunkedFetcher {
    downshift_sleep: Duration,
}

impl Default for ChunkedFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkedFetcher {
    pub fn new() -> Self {
        Self {
            downshift_sleep: DOWNSHIFT_SLEEP,
        }
    }

    /// Test constructor: skip the downshift pause.
    pub fn without_sleep() -> Self {
        Self {
            downshift_sleep: Duration::ZERO,
        }
    }

    pub async fn fetch(
        &self,
        source: &dyn SessionSource,
        username: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Value>> {
        if from > to {
            return Ok(Vec::new());
        }

        let range_days = ((to - from).num_days() + 1) as u32;
        let sizes = candidate_chunk_sizes(range_days);
        let mut last_err = None;

        for (attempt, &chunk_days) in sizes.iter().enumerate() {
            if attempt > 0 {
                info!(username, chunk_days, "Downshifting to smaller chunk size");
                tokio::time::sleep(self.downshift_sleep).await;
            }
            match self.fetch_at_size(source, username, from, to, chunk_days).await {
                Ok(rows) => return Ok(rows),
                Err(err) => {
                    warn!(username, chunk_days, error = %err, "Chunk size failed");
                    last_err = Some(err);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("no chunk sizes to try")))
    }

    async fn fetch_at_size(
        &self,
        source: &dyn SessionSource,
        username: &str,
        from: NaiveDate,
        to: NaiveDate,
        chunk_days: u32,
    ) -> Result<Vec<Value>> {
        let mut rows = Vec::new();
        for window in date_chunks(from, to, chunk_days) {
            rows.extend(source.sessions(username, window.from, window.to).await?);
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockSource;
    use serde_json::json;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[tokio::test]
    async fn small_range_fetched_in_one_window() {
        let source = MockSource::new().with_daily_rows("mlhp1", d(2024, 1, 1), d(2024, 1, 5));
        let fetcher = ChunkedFetcher::without_sleep();

        let rows = fetcher
            .fetch(&source, "mlhp1", d(2024, 1, 1), d(2024, 1, 5))
            .await
            .unwrap();

        assert_eq!(rows.len(), 5);
        assert_eq!(source.call_count(), 1);
    }

    #[tokio::test]
    async fn downshift_returns_union_without_duplicates_or_gaps() {
        // Windows longer than 10 days fail, so 90 and 45 downshift to 21...
        // which also fails, then 10 succeeds.
        let source = MockSource::new()
            .with_daily_rows("mlhp1", d(2024, 1, 1), d(2024, 2, 29))
            .failing_above_days(10);
        let fetcher = ChunkedFetcher::without_sleep();

        let rows = fetcher
            .fetch(&source, "mlhp1", d(2024, 1, 1), d(2024, 2, 29))
            .await
            .unwrap();

        // 60 days, one row per day, each exactly once.
        assert_eq!(rows.len(), 60);
        let mut dates: Vec<String> = rows
            .iter()
            .map(|r| r["session_date"].as_str().unwrap().to_string())
            .collect();
        dates.sort();
        dates.dedup();
        assert_eq!(dates.len(), 60);
    }

    #[tokio::test]
    async fn all_sizes_failing_propagates_last_error_with_no_data() {
        let source = MockSource::new()
            .with_daily_rows("mlhp1", d(2024, 1, 1), d(2024, 3, 31))
            .failing_above_days(0);
        let fetcher = ChunkedFetcher::without_sleep();

        let err = fetcher
            .fetch(&source, "mlhp1", d(2024, 1, 1), d(2024, 3, 31))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("window too large"));
        // Every ladder size was attempted before giving up.
        assert!(source.call_count() >= 5);
    }

    #[tokio::test]
    async fn empty_range_fetches_nothing() {
        let source = MockSource::new();
        let fetcher = ChunkedFetcher::without_sleep();

        let rows = fetcher
            .fetch(&source, "mlhp1", d(2024, 1, 5), d(2024, 1, 4))
            .await
            .unwrap();

        assert!(rows.is_empty());
        assert_eq!(source.call_count(), 0);
    }

    #[tokio::test]
    async fn rows_outside_registered_data_are_simply_absent() {
        let source = MockSource::new().with_rows(
            "mlhp1",
            vec![(d(2024, 1, 3), json!({"id": 7, "session_date": "2024-01-03"}))],
        );
        let fetcher = ChunkedFetcher::without_sleep();

        let rows = fetcher
            .fetch(&source, "mlhp1", d(2024, 1, 1), d(2024, 1, 10))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }
}
