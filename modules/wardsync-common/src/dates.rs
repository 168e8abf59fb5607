use chrono::{Days, NaiveDate};

/// Earliest date any entity is ever fetched from. Sessions before this
/// predate the program and are not in the upstream system.
pub const EXTRACTION_FLOOR: NaiveDate = match NaiveDate::from_ymd_opt(2023, 4, 1) {
    Some(d) => d,
    None => panic!("invalid extraction floor date"),
};

/// Chunk sizes (in days) tried in order when fetching a date range.
/// The upstream API times out on large ranges on bad days, so the fetcher
/// downshifts through this ladder until a size succeeds end-to-end.
pub const CHUNK_LADDER: [u32; 5] = [90, 45, 21, 10, 3];

/// One inclusive sub-range of a fetch span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

/// Split an inclusive date range into consecutive inclusive windows of at
/// most `chunk_days` days. Windows are non-overlapping and gap-free and
/// cover exactly `[from, to]`. Empty when `from > to`.
pub fn date_chunks(from: NaiveDate, to: NaiveDate, chunk_days: u32) -> Vec<DateWindow> {
    assert!(chunk_days > 0, "chunk_days must be positive");
    let mut windows = Vec::new();
    let mut cursor = from;
    while cursor <= to {
        let end = cursor
            .checked_add_days(Days::new(u64::from(chunk_days) - 1))
            .unwrap_or(to)
            .min(to);
        windows.push(DateWindow { from: cursor, to: end });
        cursor = match end.checked_add_days(Days::new(1)) {
            Some(next) => next,
            None => break,
        };
    }
    windows
}

/// Candidate chunk sizes for a range of `range_days` days, largest first.
///
/// Drops ladder entries that are larger than needed, but keeps one size at
/// or above the range so a small range is still fetched in one window.
/// Always retains at least the smallest size.
pub fn candidate_chunk_sizes(range_days: u32) -> Vec<u32> {
    let idx = CHUNK_LADDER
        .iter()
        .position(|&size| size < range_days)
        .unwrap_or(CHUNK_LADDER.len());
    let idx = idx.saturating_sub(1);
    CHUNK_LADDER[idx..].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn chunks_cover_range_without_gaps_or_overlap() {
        let from = d(2024, 1, 1);
        let to = d(2024, 3, 15);
        let windows = date_chunks(from, to, 21);

        assert_eq!(windows.first().unwrap().from, from);
        assert_eq!(windows.last().unwrap().to, to);
        for pair in windows.windows(2) {
            assert_eq!(
                pair[0].to.checked_add_days(Days::new(1)).unwrap(),
                pair[1].from
            );
        }

        let total_days: i64 = windows
            .iter()
            .map(|w| (w.to - w.from).num_days() + 1)
            .sum();
        assert_eq!(total_days, (to - from).num_days() + 1);
    }

    #[test]
    fn single_day_range_is_one_window() {
        let day = d(2024, 6, 1);
        let windows = date_chunks(day, day, 90);
        assert_eq!(windows, vec![DateWindow { from: day, to: day }]);
    }

    #[test]
    fn empty_range_yields_no_windows() {
        assert!(date_chunks(d(2024, 6, 2), d(2024, 6, 1), 10).is_empty());
    }

    #[test]
    fn ladder_keeps_one_size_at_or_above_range() {
        assert_eq!(candidate_chunk_sizes(100), vec![90, 45, 21, 10, 3]);
        assert_eq!(candidate_chunk_sizes(30), vec![45, 21, 10, 3]);
        assert_eq!(candidate_chunk_sizes(5), vec![10, 3]);
        assert_eq!(candidate_chunk_sizes(2), vec![3]);
    }

    #[test]
    fn ladder_always_retains_smallest_size() {
        assert_eq!(candidate_chunk_sizes(1), vec![3]);
        assert_eq!(candidate_chunk_sizes(3), vec![3]);
    }
}
