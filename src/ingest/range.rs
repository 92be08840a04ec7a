//! Time ranges and the range splitter.
use chrono::{DateTime, TimeDelta, Utc};
use std::fmt;

use super::{Error, Result};

/// Half-open time window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeRange {
    /// Creates a new range, failing if `start > end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start > end {
            return Err(Error::InvalidArgument(format!(
                "range start {start} is after end {end}"
            )));
        }
        Ok(TimeRange { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn span(&self) -> TimeDelta {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Returns `true` if the instant lies inside `[start, end)`.
    pub fn contains(&self, instant: &DateTime<Utc>) -> bool {
        self.start <= *instant && *instant < self.end
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// Splits `[start, end)` into consecutive sub-ranges no longer than `max_span`.
///
/// The returned iterator is lazy and can be cloned to restart the sequence.
/// `start == end` yields no ranges.
pub fn split(start: DateTime<Utc>, end: DateTime<Utc>, max_span: TimeDelta) -> Result<Ranges> {
    if max_span <= TimeDelta::zero() {
        return Err(Error::InvalidArgument(format!(
            "max span must be positive, got {max_span}"
        )));
    }
    let window = TimeRange::new(start, end)?;
    Ok(Ranges {
        cursor: window.start,
        end: window.end,
        max_span,
    })
}

/// Lazy sequence of sub-ranges produced by [`split`].
#[derive(Debug, Clone)]
pub struct Ranges {
    cursor: DateTime<Utc>,
    end: DateTime<Utc>,
    max_span: TimeDelta,
}

impl Iterator for Ranges {
    type Item = TimeRange;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.end {
            return None;
        }
        let next_end = self
            .cursor
            .checked_add_signed(self.max_span)
            .map_or(self.end, |next| next.min(self.end));
        let range = TimeRange {
            start: self.cursor,
            end: next_end,
        };
        self.cursor = next_end;
        Some(range)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining();
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Ranges {}

impl Ranges {
    fn remaining(&self) -> usize {
        if self.cursor >= self.end {
            return 0;
        }
        let total = nanoseconds(self.end - self.cursor);
        let span = nanoseconds(self.max_span);
        usize::try_from(total.div_ceil(span)).unwrap_or(usize::MAX)
    }
}

/// Length of a positive delta in nanoseconds, without overflow.
fn nanoseconds(delta: TimeDelta) -> u128 {
    delta.num_seconds().unsigned_abs() as u128 * 1_000_000_000
        + delta.subsec_nanos().unsigned_abs() as u128
}
