use std::fmt;

use chrono::{DateTime, NaiveDate, TimeDelta, Timelike, Utc};

use crate::bail;
use crate::error::{ErrorKind, IngestResult};

/// Granularity at which a source attributes records to time.
///
/// Lower window bounds are truncated to it, so a date-attributed source is never asked for a
/// partial day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Granularity {
    Timestamp,
    Hour,
    Date,
}

impl Granularity {
    /// Truncates `timestamp` down to this granularity.
    pub fn truncate(&self, timestamp: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Granularity::Timestamp => timestamp,
            Granularity::Hour => timestamp
                .with_nanosecond(0)
                .and_then(|t| t.with_second(0))
                .and_then(|t| t.with_minute(0))
                .unwrap_or(timestamp),
            Granularity::Date => timestamp
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .map(|naive| naive.and_utc())
                .unwrap_or(timestamp),
        }
    }
}

/// The `[from, until)` range to extract for one run, optionally walked in chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionWindow {
    from: DateTime<Utc>,
    until: DateTime<Utc>,
    chunk_size: Option<TimeDelta>,
}

impl ExtractionWindow {
    /// Creates a window, rejecting `from > until` and non-positive chunk sizes.
    pub fn new(
        from: DateTime<Utc>,
        until: DateTime<Utc>,
        chunk_size: Option<TimeDelta>,
    ) -> IngestResult<Self> {
        if from > until {
            bail!(
                ErrorKind::InvalidWindow,
                "Extraction window starts after it ends",
                format!("from {from} is after until {until}")
            );
        }

        if let Some(chunk_size) = chunk_size
            && chunk_size <= TimeDelta::zero()
        {
            bail!(
                ErrorKind::InvalidWindow,
                "Extraction chunk size must be positive",
                format!("chunk size is {chunk_size}")
            );
        }

        Ok(Self {
            from,
            until,
            chunk_size,
        })
    }

    pub fn from(&self) -> DateTime<Utc> {
        self.from
    }

    pub fn until(&self) -> DateTime<Utc> {
        self.until
    }

    pub fn chunk_size(&self) -> Option<TimeDelta> {
        self.chunk_size
    }

    /// Returns the consecutive, non-overlapping sub-windows covering `[from, until)` in ascending
    /// order. The last one may be shorter than the chunk size. An empty window has none.
    pub fn sub_windows(&self) -> Vec<SubWindow> {
        if self.from == self.until {
            return Vec::new();
        }

        let Some(chunk_size) = self.chunk_size else {
            return vec![SubWindow {
                from: self.from,
                until: self.until,
            }];
        };

        let mut sub_windows = Vec::new();
        let mut from = self.from;
        while from < self.until {
            let until = from
                .checked_add_signed(chunk_size)
                .map_or(self.until, |until| until.min(self.until));
            sub_windows.push(SubWindow { from, until });
            from = until;
        }

        sub_windows
    }
}

/// One `[from, until)` chunk of an extraction window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubWindow {
    pub from: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

impl SubWindow {
    pub fn new(from: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        Self { from, until }
    }

    /// Returns the first calendar day touched by the sub-window.
    pub fn first_day(&self) -> NaiveDate {
        self.from.date_naive()
    }

    /// Returns the last calendar day touched by the sub-window, for APIs taking inclusive date
    /// ranges.
    pub fn last_day_inclusive(&self) -> NaiveDate {
        if self.until <= self.from {
            return self.from.date_naive();
        }

        (self.until - TimeDelta::nanoseconds(1)).date_naive()
    }
}

impl fmt::Display for SubWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.from.to_rfc3339(), self.until.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_sub_windows_with_shorter_tail() {
        let window = ExtractionWindow::new(day(1), day(8), Some(TimeDelta::days(3))).unwrap();

        assert_eq!(
            window.sub_windows(),
            vec![
                SubWindow::new(day(1), day(4)),
                SubWindow::new(day(4), day(7)),
                SubWindow::new(day(7), day(8)),
            ]
        );
    }

    #[test]
    fn test_sub_windows_cover_window_without_gaps() {
        for (days, chunk_hours) in [(1, 5), (7, 24), (10, 7), (3, 72), (2, 100)] {
            let window = ExtractionWindow::new(
                day(1),
                day(1 + days),
                Some(TimeDelta::hours(chunk_hours)),
            )
            .unwrap();
            let sub_windows = window.sub_windows();

            assert_eq!(sub_windows.first().map(|w| w.from), Some(window.from()));
            assert_eq!(sub_windows.last().map(|w| w.until), Some(window.until()));
            for pair in sub_windows.windows(2) {
                assert_eq!(pair[0].until, pair[1].from);
                assert!(pair[0].from < pair[0].until);
            }
        }
    }

    #[test]
    fn test_unchunked_window_is_one_sub_window() {
        let window = ExtractionWindow::new(day(1), day(8), None).unwrap();
        assert_eq!(window.sub_windows(), vec![SubWindow::new(day(1), day(8))]);
    }

    #[test]
    fn test_empty_window_has_no_sub_windows() {
        let window = ExtractionWindow::new(day(1), day(1), Some(TimeDelta::days(1))).unwrap();
        assert!(window.sub_windows().is_empty());
    }

    #[test]
    fn test_inverted_window_is_rejected() {
        assert_eq!(
            ExtractionWindow::new(day(2), day(1), None).map_err(|err| err.kind()),
            Err(ErrorKind::InvalidWindow)
        );
    }

    #[test]
    fn test_truncation() {
        let timestamp = Utc.with_ymd_and_hms(2024, 3, 10, 13, 45, 12).unwrap();

        assert_eq!(
            Granularity::Date.truncate(timestamp),
            Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap()
        );
        assert_eq!(
            Granularity::Hour.truncate(timestamp),
            Utc.with_ymd_and_hms(2024, 3, 10, 13, 0, 0).unwrap()
        );
        assert_eq!(Granularity::Timestamp.truncate(timestamp), timestamp);
    }

    #[test]
    fn test_last_day_inclusive() {
        assert_eq!(
            SubWindow::new(day(1), day(4)).last_day_inclusive(),
            NaiveDate::from_ymd_opt(2024, 1, 3).unwrap()
        );
    }
}
