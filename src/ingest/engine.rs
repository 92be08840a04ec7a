//! Ingestion loop.
use futures::{StreamExt, stream};
use std::pin::pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use tokio_retry::RetryIf;
use tokio_util::sync::CancellationToken;

use super::{FetchOutcome, HistoryFetcher, IngestionReport, RetryPolicy, Sink, TimeRange};

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
enum FetchError {
    #[error("{0}")]
    Transient(String),
    #[error("{0}")]
    Permanent(String),
}

impl FetchError {
    fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

impl<R> FetchOutcome<R> {
    fn into_result(self) -> Result<Vec<R>, FetchError> {
        match self {
            FetchOutcome::Success(records) => Ok(records),
            FetchOutcome::TransientFailure(reason) => Err(FetchError::Transient(reason)),
            FetchOutcome::PermanentFailure(reason) => Err(FetchError::Permanent(reason)),
        }
    }
}

/// Final state of one sub-range after all attempts.
struct RangeAttempt<R> {
    range: TimeRange,
    result: Result<Vec<R>, FetchError>,
    attempts: u32,
}

/// Drives sub-ranges through a fetcher into a sink.
///
/// Up to `concurrency` fetches run at once, but batches are always handed to
/// the sink in input order. Failures never abort the run: every outcome ends
/// up in the returned [`IngestionReport`].
#[derive(Debug, Clone)]
pub struct IngestionLoop {
    policy: RetryPolicy,
    fetch_timeout: Duration,
    concurrency: usize,
}

impl Default for IngestionLoop {
    fn default() -> Self {
        IngestionLoop::new(RetryPolicy::default(), DEFAULT_FETCH_TIMEOUT)
    }
}

impl IngestionLoop {
    /// Creates a sequential ingestion loop.
    pub fn new(policy: RetryPolicy, fetch_timeout: Duration) -> Self {
        IngestionLoop {
            policy,
            fetch_timeout,
            concurrency: 1,
        }
    }

    /// Allows up to `concurrency` sub-ranges to be fetched at the same time.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Ingests every range in order until the input is exhausted or `cancel` fires.
    ///
    /// On cancellation, in-flight fetches are abandoned and the ranges they
    /// covered appear in neither list of the returned report.
    pub async fn run<I, F, S>(
        &self,
        ranges: I,
        fetcher: &F,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> IngestionReport
    where
        I: IntoIterator<Item = TimeRange>,
        F: HistoryFetcher,
        S: Sink<F::Record>,
    {
        let mut report = IngestionReport::default();
        let mut attempts = pin!(
            stream::iter(ranges)
                .map(move |range| self.ingest_range(fetcher, range))
                .buffered(self.concurrency)
        );

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    log::info!("Ingestion cancelled, returning partial report");
                    report.mark_cancelled();
                    break;
                }
                next = attempts.next() => next,
            };
            let Some(attempt) = next else {
                break;
            };
            match attempt.result {
                Ok(records) => {
                    log::debug!("Range {} delivered {} records", attempt.range, records.len());
                    sink.accept(records);
                    report.record_completed(attempt.range);
                }
                Err(e) => {
                    log::error!(
                        "Range {} failed after {} attempt(s): {e}",
                        attempt.range,
                        attempt.attempts
                    );
                    report.record_failed(attempt.range, e.to_string(), attempt.attempts);
                }
            }
        }
        report
    }

    /// Fetches one range, retrying transient failures per the retry policy.
    async fn ingest_range<F: HistoryFetcher>(
        &self,
        fetcher: &F,
        range: TimeRange,
    ) -> RangeAttempt<F::Record> {
        let attempts = AtomicU32::new(0);
        let counter = &attempts;
        let result = RetryIf::spawn(
            self.policy.strategy(),
            move || {
                let attempt = counter.fetch_add(1, Ordering::Relaxed) + 1;
                self.fetch_once(fetcher, range, attempt)
            },
            FetchError::is_transient,
        )
        .await;
        RangeAttempt {
            range,
            result,
            attempts: attempts.load(Ordering::Relaxed),
        }
    }

    /// Single fetch call bounded by the fetch timeout.
    async fn fetch_once<F: HistoryFetcher>(
        &self,
        fetcher: &F,
        range: TimeRange,
        attempt: u32,
    ) -> Result<Vec<F::Record>, FetchError> {
        log::debug!(
            "Fetching range {range} (attempt {attempt}/{})",
            self.policy.max_attempts()
        );
        let outcome = timeout(self.fetch_timeout, fetcher.fetch(range))
            .await
            .unwrap_or_else(|_| {
                FetchOutcome::TransientFailure(format!(
                    "fetch timed out after {:?}",
                    self.fetch_timeout
                ))
            });
        let result = outcome.into_result();
        if let Err(FetchError::Transient(reason)) = &result {
            log::warn!("Transient failure for range {range} on attempt {attempt}: {reason}");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::split;
    use chrono::{DateTime, TimeDelta, TimeZone, Utc};
    use std::collections::HashMap;
    use std::sync::Mutex;

    type Script = fn(TimeRange, u32) -> FetchOutcome<String>;

    /// Fetcher answering from a script of (range, call number) -> outcome.
    struct ScriptedFetcher {
        script: Script,
        calls: Mutex<HashMap<TimeRange, u32>>,
        delay: Duration,
    }

    impl ScriptedFetcher {
        fn new(script: Script) -> Self {
            ScriptedFetcher {
                script,
                calls: Mutex::new(HashMap::new()),
                delay: Duration::ZERO,
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn calls(&self, range: &TimeRange) -> u32 {
            self.calls.lock().unwrap().get(range).copied().unwrap_or(0)
        }
    }

    impl HistoryFetcher for ScriptedFetcher {
        type Record = String;

        async fn fetch(&self, range: TimeRange) -> FetchOutcome<String> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                let count = calls.entry(range).or_insert(0);
                *count += 1;
                *count
            };
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            (self.script)(range, call)
        }
    }

    fn day(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    fn three_days() -> Vec<TimeRange> {
        split(day(1), day(4), TimeDelta::days(1)).unwrap().collect()
    }

    fn fast_loop() -> IngestionLoop {
        let policy =
            RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(4)).unwrap();
        IngestionLoop::new(policy, Duration::from_secs(1))
    }

    fn one_record(range: TimeRange, _call: u32) -> FetchOutcome<String> {
        FetchOutcome::Success(vec![range.start().format("%m-%d").to_string()])
    }

    #[tokio::test]
    async fn test_all_success_delivers_in_order() {
        let fetcher = ScriptedFetcher::new(one_record);
        let mut delivered = Vec::new();
        let mut sink = |batch: Vec<String>| delivered.push(batch);

        let report = fast_loop()
            .run(three_days(), &fetcher, &mut sink, &CancellationToken::new())
            .await;

        assert_eq!(report.completed_ranges(), three_days().as_slice());
        assert!(report.failed_ranges().is_empty());
        assert!(!report.is_cancelled());
        assert_eq!(
            delivered,
            vec![vec!["01-01"], vec!["01-02"], vec!["01-03"]]
        );
    }

    #[tokio::test]
    async fn test_records_keep_fetch_order() {
        let fetcher = ScriptedFetcher::new(|_, _| {
            FetchOutcome::Success(vec!["b".to_string(), "a".to_string(), "c".to_string()])
        });
        let mut delivered = Vec::new();
        let mut sink = |batch: Vec<String>| delivered.extend(batch);

        fast_loop()
            .run(three_days().into_iter().take(1), &fetcher, &mut sink, &CancellationToken::new())
            .await;

        assert_eq!(delivered, vec!["b", "a", "c"]);
    }

    #[tokio::test]
    async fn test_transient_failure_exhausts_retries() {
        let fetcher = ScriptedFetcher::new(|range, call| {
            if range.start() == day(2) {
                FetchOutcome::TransientFailure(format!("rate limited #{call}"))
            } else {
                one_record(range, call)
            }
        });
        let mut delivered = Vec::new();
        let mut sink = |batch: Vec<String>| delivered.push(batch);
        let ranges = three_days();

        let report = fast_loop()
            .run(ranges.clone(), &fetcher, &mut sink, &CancellationToken::new())
            .await;

        assert_eq!(report.completed_ranges(), &[ranges[0], ranges[2]]);
        assert_eq!(report.failed_ranges().len(), 1);
        let failed = &report.failed_ranges()[0];
        assert_eq!(failed.range, ranges[1]);
        assert_eq!(failed.attempts, 3);
        assert_eq!(failed.reason, "rate limited #3");
        assert_eq!(fetcher.calls(&ranges[1]), 3);
        assert_eq!(delivered, vec![vec!["01-01"], vec!["01-03"]]);
        assert_eq!(report.status(), crate::ingest::IngestionStatus::Partial);
    }

    #[tokio::test]
    async fn test_transient_failure_recovers() {
        let fetcher = ScriptedFetcher::new(|range, call| {
            if call < 3 {
                FetchOutcome::TransientFailure("hiccup".into())
            } else {
                one_record(range, call)
            }
        });
        let mut sink = |_: Vec<String>| {};
        let ranges = three_days();

        let report = fast_loop()
            .run(ranges.clone(), &fetcher, &mut sink, &CancellationToken::new())
            .await;

        assert_eq!(report.completed_ranges(), ranges.as_slice());
        assert!(report.failed_ranges().is_empty());
        assert_eq!(fetcher.calls(&ranges[0]), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let fetcher = ScriptedFetcher::new(|range, call| {
            if range.start() == day(1) {
                FetchOutcome::PermanentFailure("unauthorized".into())
            } else {
                one_record(range, call)
            }
        });
        let mut delivered = Vec::new();
        let mut sink = |batch: Vec<String>| delivered.push(batch);
        let ranges = three_days();

        let report = fast_loop()
            .run(ranges.clone(), &fetcher, &mut sink, &CancellationToken::new())
            .await;

        assert_eq!(fetcher.calls(&ranges[0]), 1);
        assert_eq!(report.failed_ranges()[0].range, ranges[0]);
        assert_eq!(report.failed_ranges()[0].attempts, 1);
        assert_eq!(report.failed_ranges()[0].reason, "unauthorized");
        assert_eq!(delivered, vec![vec!["01-02"], vec!["01-03"]]);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_transient() {
        let fetcher = ScriptedFetcher::new(one_record).with_delay(Duration::from_millis(200));
        let policy = RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(1)).unwrap();
        let ingestion = IngestionLoop::new(policy, Duration::from_millis(10));
        let mut delivered = Vec::new();
        let mut sink = |batch: Vec<String>| delivered.push(batch);
        let ranges = three_days();

        let report = ingestion
            .run(ranges.into_iter().take(1), &fetcher, &mut sink, &CancellationToken::new())
            .await;

        assert!(delivered.is_empty());
        assert!(report.completed_ranges().is_empty());
        let failed = &report.failed_ranges()[0];
        assert_eq!(failed.attempts, 2);
        assert!(failed.reason.contains("timed out"));
        assert_eq!(report.status(), crate::ingest::IngestionStatus::Failure);
    }

    #[tokio::test]
    async fn test_empty_input_is_success() {
        let fetcher = ScriptedFetcher::new(one_record);
        let mut sink = |_: Vec<String>| {};

        let report = fast_loop()
            .run(Vec::new(), &fetcher, &mut sink, &CancellationToken::new())
            .await;

        assert_eq!(report, IngestionReport::default());
    }

    /// Fetcher that completes the first range and cancels while the second is in flight.
    struct CancellingFetcher {
        cancel: CancellationToken,
    }

    impl HistoryFetcher for CancellingFetcher {
        type Record = String;

        async fn fetch(&self, range: TimeRange) -> FetchOutcome<String> {
            if range.start() == day(1) {
                return one_record(range, 1);
            }
            self.cancel.cancel();
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_cancel_returns_partial_report() {
        let cancel = CancellationToken::new();
        let fetcher = CancellingFetcher {
            cancel: cancel.clone(),
        };
        let mut delivered = Vec::new();
        let mut sink = |batch: Vec<String>| delivered.push(batch);
        let ranges = three_days();

        let report = fast_loop()
            .run(ranges.clone(), &fetcher, &mut sink, &cancel)
            .await;

        assert!(report.is_cancelled());
        assert_eq!(report.completed_ranges(), &[ranges[0]]);
        assert!(report.failed_ranges().is_empty());
        assert_eq!(delivered, vec![vec!["01-01"]]);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_fetches_nothing() {
        let fetcher = ScriptedFetcher::new(one_record);
        let mut sink = |_: Vec<String>| {};
        let cancel = CancellationToken::new();
        cancel.cancel();
        let ranges = three_days();

        let report = fast_loop().run(ranges.clone(), &fetcher, &mut sink, &cancel).await;

        assert!(report.is_cancelled());
        assert!(report.completed_ranges().is_empty());
        assert_eq!(fetcher.calls(&ranges[0]), 0);
    }

    #[tokio::test]
    async fn test_concurrent_fetches_are_delivered_in_order() {
        // Earlier ranges take longer, so they complete last.
        struct SlowFirst;

        impl HistoryFetcher for SlowFirst {
            type Record = String;

            async fn fetch(&self, range: TimeRange) -> FetchOutcome<String> {
                let delay = match range.start().format("%d").to_string().as_str() {
                    "01" => 60,
                    "02" => 30,
                    _ => 0,
                };
                tokio::time::sleep(Duration::from_millis(delay)).await;
                one_record(range, 1)
            }
        }

        let mut delivered = Vec::new();
        let mut sink = |batch: Vec<String>| delivered.push(batch);
        let ranges = three_days();

        let report = fast_loop()
            .with_concurrency(3)
            .run(ranges.clone(), &SlowFirst, &mut sink, &CancellationToken::new())
            .await;

        assert_eq!(report.completed_ranges(), ranges.as_slice());
        assert_eq!(
            delivered,
            vec![vec!["01-01"], vec!["01-02"], vec!["01-03"]]
        );
    }
}
