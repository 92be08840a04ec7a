//! Bounded time-range history ingestion.
//! A window is split into sub-ranges, each sub-range is fetched with retries and
//! successful batches are delivered to a sink in chronological order.
mod engine;
mod range;
mod report;
mod retry;

use std::future::Future;

pub use engine::IngestionLoop;
pub use range::{Ranges, TimeRange, split};
pub use report::{FailedRange, IngestionReport, IngestionStatus};
pub use retry::RetryPolicy;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Result of fetching one sub-range.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome<R> {
    Success(Vec<R>),
    /// Expected to possibly succeed on retry (timeouts, rate limits).
    TransientFailure(String),
    /// Not expected to resolve via retry (bad credentials, malformed request).
    PermanentFailure(String),
}

/// Source of historical records for one sub-range at a time.
pub trait HistoryFetcher {
    type Record;

    fn fetch(&self, range: TimeRange) -> impl Future<Output = FetchOutcome<Self::Record>> + Send;
}

/// Consumer of record batches. Batches arrive in chronological range order.
pub trait Sink<R> {
    fn accept(&mut self, records: Vec<R>);
}

impl<R, F> Sink<R> for F
where
    F: FnMut(Vec<R>),
{
    fn accept(&mut self, records: Vec<R>) {
        self(records)
    }
}
