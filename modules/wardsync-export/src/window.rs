use anyhow::{bail, Result};
use chrono::{Days, NaiveDate};

/// Earliest patient-training data in the upstream system.
pub const DEFAULT_START: NaiveDate = match NaiveDate::from_ymd_opt(2023, 6, 1) {
    Some(d) => d,
    None => panic!("invalid default start date"),
};

/// Warehouse exports re-fetch this many trailing days so late-created
/// sessions are picked up; the content hash deduplicates the overlap.
pub const OVERLAP_DAYS: u64 = 30;

/// Inclusive date window for one export run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl ExportWindow {
    pub fn validate(&self, today: NaiveDate) -> Result<()> {
        if self.start > self.end {
            bail!("Start date cannot be later than end date.");
        }
        if self.end > today {
            bail!("End date cannot be later than today.");
        }
        Ok(())
    }
}

/// Window for a warehouse export: from `OVERLAP_DAYS` before the latest
/// loaded session date (or the default start on first run) through
/// yesterday. The start never precedes `DEFAULT_START`; there is nothing
/// upstream before it.
pub fn warehouse_window(today: NaiveDate, max_loaded: Option<NaiveDate>) -> ExportWindow {
    let start = max_loaded
        .and_then(|d| d.checked_sub_days(Days::new(OVERLAP_DAYS - 1)))
        .map_or(DEFAULT_START, |d| d.max(DEFAULT_START));
    let end = today.checked_sub_days(Days::new(1)).unwrap_or(today);
    ExportWindow { start, end }
}

/// Window for a local export: the last seven full days, with optional
/// explicit overrides from the command line.
pub fn local_window(
    today: NaiveDate,
    start_override: Option<NaiveDate>,
    end_override: Option<NaiveDate>,
) -> ExportWindow {
    let start = start_override
        .unwrap_or_else(|| today.checked_sub_days(Days::new(7)).unwrap_or(today));
    let end = end_override
        .unwrap_or_else(|| today.checked_sub_days(Days::new(1)).unwrap_or(today));
    ExportWindow { start, end }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn first_warehouse_run_starts_at_default() {
        let w = warehouse_window(d(2024, 3, 10), None);
        assert_eq!(w.start, DEFAULT_START);
        assert_eq!(w.end, d(2024, 3, 9));
    }

    #[test]
    fn warehouse_window_overlaps_previous_load() {
        let w = warehouse_window(d(2024, 3, 10), Some(d(2024, 3, 1)));
        assert_eq!(w.start, d(2024, 2, 1));
        assert_eq!(w.end, d(2024, 3, 9));
    }

    #[test]
    fn warehouse_overlap_never_precedes_default_start() {
        // Latest load sits so close to the default start that the full
        // overlap would reach before it.
        let w = warehouse_window(d(2024, 3, 10), Some(d(2023, 6, 5)));
        assert_eq!(w.start, DEFAULT_START);

        // Exactly at the boundary: overlap lands on the default start.
        let w = warehouse_window(d(2024, 3, 10), Some(d(2023, 6, 30)));
        assert_eq!(w.start, d(2023, 6, 1));
    }

    #[test]
    fn local_window_defaults_to_last_week() {
        let w = local_window(d(2024, 3, 10), None, None);
        assert_eq!(w.start, d(2024, 3, 3));
        assert_eq!(w.end, d(2024, 3, 9));
    }

    #[test]
    fn local_overrides_are_applied() {
        let w = local_window(d(2024, 3, 10), Some(d(2024, 1, 1)), Some(d(2024, 1, 31)));
        assert_eq!(w.start, d(2024, 1, 1));
        assert_eq!(w.end, d(2024, 1, 31));
    }

    #[test]
    fn inverted_window_is_rejected() {
        let w = ExportWindow { start: d(2024, 2, 1), end: d(2024, 1, 1) };
        assert!(w.validate(d(2024, 3, 1)).is_err());
    }

    #[test]
    fn future_end_is_rejected() {
        let w = ExportWindow { start: d(2024, 1, 1), end: d(2024, 3, 2) };
        assert!(w.validate(d(2024, 3, 1)).is_err());
    }
}
