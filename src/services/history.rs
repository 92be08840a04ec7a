//! History Background Service.
//! This service backfills the observations of a device over a bounded past window and logs them.

use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::ServiceHandle;
use crate::ingest::{
    self, FetchOutcome, HistoryFetcher, IngestionLoop, IngestionReport, IngestionStatus,
    RetryPolicy, Sink, TimeRange,
};
use crate::integration::ambient::{self, Observation};

/// Tuning of a history backfill.
#[derive(Debug, Clone, PartialEq)]
pub struct HistorySettings {
    pub window: TimeDelta,
    pub page_span: TimeDelta,
    pub page_limit: u32,
    pub retry_policy: RetryPolicy,
    pub fetch_timeout: Duration,
    pub concurrency: usize,
}

impl Default for HistorySettings {
    fn default() -> Self {
        HistorySettings {
            window: TimeDelta::days(30),
            page_span: TimeDelta::days(1),
            page_limit: ambient::MAX_HISTORY_LIMIT,
            retry_policy: RetryPolicy::default(),
            fetch_timeout: Duration::from_secs(10),
            concurrency: 1,
        }
    }
}

/// Fetches the history of one device from Ambient Weather, one sub-range per request.
pub struct DeviceHistoryFetcher {
    client: Arc<ambient::Client>,
    mac_address: String,
    page_limit: u32,
}

impl DeviceHistoryFetcher {
    pub fn new(client: Arc<ambient::Client>, mac_address: String, page_limit: u32) -> Self {
        DeviceHistoryFetcher {
            client,
            mac_address,
            page_limit: page_limit.clamp(1, ambient::MAX_HISTORY_LIMIT),
        }
    }

    /// Keeps the observations inside `range`, oldest first, one per timestamp.
    /// The API pages backwards from the end date, so older records may spill over the range start.
    pub fn within(range: &TimeRange, observations: Vec<Observation>) -> Vec<Observation> {
        let mut observations: Vec<_> = observations
            .into_iter()
            .filter(|o| o.timestamp().is_some_and(|t| range.contains(&t)))
            .collect();
        observations.sort_by_key(Observation::timestamp);
        observations.dedup_by_key(|o| o.timestamp());
        observations
    }

    /// Requests pages backwards from the range end until a page is short or
    /// reaches the range start.
    async fn fetch_pages(&self, range: &TimeRange) -> ambient::Result<Vec<Observation>> {
        let mut end_date = range.end();
        let mut observations = Vec::new();
        loop {
            let page = self
                .client
                .fetch_device_history(&self.mac_address, end_date, self.page_limit)
                .await?;
            let full = page.len() >= self.page_limit as usize;
            let oldest = page.iter().filter_map(Observation::timestamp).min();
            observations.extend(page);
            match oldest {
                Some(oldest) if full && oldest > range.start() && oldest < end_date => {
                    log::debug!("Range {range} has more than one page, continuing before {oldest}");
                    end_date = oldest;
                }
                _ => return Ok(observations),
            }
        }
    }
}

impl HistoryFetcher for DeviceHistoryFetcher {
    type Record = Observation;

    async fn fetch(&self, range: TimeRange) -> FetchOutcome<Observation> {
        match self.fetch_pages(&range).await {
            Ok(observations) => FetchOutcome::Success(Self::within(&range, observations)),
            Err(e) if e.is_transient() => FetchOutcome::TransientFailure(e.to_string()),
            Err(e) => FetchOutcome::PermanentFailure(e.to_string()),
        }
    }
}

/// Sink logging each batch of observations.
#[derive(Debug, Default)]
pub struct LogSink {
    batches: usize,
    observations: usize,
}

impl LogSink {
    pub fn batches(&self) -> usize {
        self.batches
    }

    pub fn observations(&self) -> usize {
        self.observations
    }
}

impl Sink<Observation> for LogSink {
    fn accept(&mut self, records: Vec<Observation>) {
        self.batches += 1;
        self.observations += records.len();
        let Some(first) = records.first() else {
            log::info!("Received empty batch");
            return;
        };
        match serde_json::to_string(first) {
            Ok(json) => log::info!("Received {} observations, first: {json}", records.len()),
            Err(e) => log::warn!("Received {} observations, cannot encode first: {e}", records.len()),
        }
    }
}

pub struct HistoryBackgroundService {
    fetcher: DeviceHistoryFetcher,
    ingestion: IngestionLoop,
    settings: HistorySettings,
}

impl HistoryBackgroundService {
    /// Creates a new instance of `HistoryBackgroundService`.
    pub fn new(client: Arc<ambient::Client>, mac_address: String, settings: HistorySettings) -> Self {
        let fetcher = DeviceHistoryFetcher::new(client, mac_address, settings.page_limit);
        let ingestion = IngestionLoop::new(settings.retry_policy, settings.fetch_timeout)
            .with_concurrency(settings.concurrency);
        HistoryBackgroundService {
            fetcher,
            ingestion,
            settings,
        }
    }

    /// Spawns the backfill as a background task.
    pub fn start(self: Arc<Self>, shutdown: &CancellationToken) -> ServiceHandle {
        ServiceHandle::spawn("History", shutdown, move |token| async move {
            self.run(token).await;
        })
    }

    /// Backfill the configured window ending now, then log the outcome.
    pub async fn run(&self, shutdown: CancellationToken) {
        let window = match self.window_ending(Utc::now()) {
            Ok(window) => window,
            Err(e) => {
                log::error!("Cannot start backfill: {e}");
                return;
            }
        };
        log::info!(
            "Starting backfill of {} from {} to {}",
            self.fetcher.mac_address,
            window.start(),
            window.end()
        );
        match self.backfill(window.start(), window.end(), &shutdown).await {
            Ok(report) => Self::log_report(&report),
            Err(e) => log::error!("Cannot start backfill: {e}"),
        }
    }

    /// The configured window ending at `end`.
    pub fn window_ending(&self, end: DateTime<Utc>) -> ingest::Result<TimeRange> {
        let start = end.checked_sub_signed(self.settings.window).ok_or_else(|| {
            ingest::Error::InvalidArgument(format!(
                "history window {} reaches before the earliest representable date",
                self.settings.window
            ))
        })?;
        TimeRange::new(start, end)
    }

    /// Backfill `[start, end)` and return the report.
    pub async fn backfill(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        shutdown: &CancellationToken,
    ) -> ingest::Result<IngestionReport> {
        let ranges = ingest::split(start, end, self.settings.page_span)?;
        log::debug!("Backfill split into {} ranges", ranges.len());
        let mut sink = LogSink::default();
        let report = self
            .ingestion
            .run(ranges, &self.fetcher, &mut sink, shutdown)
            .await;
        log::info!(
            "Backfill delivered {} observations in {} batches",
            sink.observations(),
            sink.batches()
        );
        Ok(report)
    }

    fn log_report(report: &IngestionReport) {
        let status = report.status();
        let completed = report.completed_ranges().len();
        let failed = report.failed_ranges().len();
        match status {
            IngestionStatus::Success => {
                log::info!("Backfill {status}: {completed} ranges completed")
            }
            IngestionStatus::Partial | IngestionStatus::Failure => {
                log::warn!("Backfill {status}: {completed} ranges completed, {failed} failed");
                for failed in report.failed_ranges() {
                    log::warn!(
                        "Range {} failed after {} attempt(s): {}",
                        failed.range,
                        failed.attempts,
                        failed.reason
                    );
                }
            }
        }
        if report.is_cancelled() {
            log::info!("Backfill was cancelled before completion");
        }
    }
}
