//! Ingestion report returned by the ingestion loop.
use strum_macros::Display;

use super::TimeRange;

/// A sub-range that could not be ingested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedRange {
    pub range: TimeRange,
    pub reason: String,
    pub attempts: u32,
}

/// Overall result of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum IngestionStatus {
    #[strum(serialize = "success")]
    Success,
    #[strum(serialize = "partial")]
    Partial,
    #[strum(serialize = "failure")]
    Failure,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestionReport {
    completed: Vec<TimeRange>,
    failed: Vec<FailedRange>,
    cancelled: bool,
}

impl IngestionReport {
    /// Ranges delivered to the sink, in chronological order.
    pub fn completed_ranges(&self) -> &[TimeRange] {
        &self.completed
    }

    /// Ranges that failed permanently or exhausted their retries.
    pub fn failed_ranges(&self) -> &[FailedRange] {
        &self.failed
    }

    /// Returns `true` if the run stopped before the input was exhausted.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn status(&self) -> IngestionStatus {
        match (self.completed.is_empty(), self.failed.is_empty()) {
            (_, true) => IngestionStatus::Success,
            (true, false) => IngestionStatus::Failure,
            (false, false) => IngestionStatus::Partial,
        }
    }

    pub(super) fn record_completed(&mut self, range: TimeRange) {
        self.completed.push(range);
    }

    pub(super) fn record_failed(&mut self, range: TimeRange, reason: String, attempts: u32) {
        self.failed.push(FailedRange {
            range,
            reason,
            attempts,
        });
    }

    pub(super) fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }
}
