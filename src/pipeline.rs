//! Pipeline orchestrator: Fetching → Normalizing → Loading → Ready | Failed.
//!
//! A run never returns a raw error. Whatever happens, the caller receives a
//! `RunReport` whose terminal state is `Ready` (with the fresh projection) or
//! `Failed` (with the most specific error kind). Cancellation is checked before
//! every stage transition; stored data is never rolled back by a failed run.

use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::error::{PipelineError, StoreError};
use crate::fetcher::{FetchOutcome, Fetcher, RetryPolicy};
use crate::models::{Alert, LocationSummary, Measurement};
use crate::normalizer::Normalizer;
use crate::ranker::{detect_alerts, rank, summary_stats, Breakpoints, SummaryStats};
use crate::source::MeasurementSource;
use crate::store::MeasurementStore;

// ---

/// Longest accepted look-back window, in hours (ten years).
pub const MAX_WINDOW_HOURS: u32 = 24 * 365 * 10;

/// Start of a window of length `window` ending at `now`, if representable.
pub fn window_start(now: DateTime<Utc>, window: ChronoDuration) -> Option<DateTime<Utc>> {
    now.checked_sub_signed(window)
}

/// Immutable per-pipeline settings, fixed at construction.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    // ---
    pub pollutant: String,
    pub page_size: u32,
    pub max_pages: u32,
    /// Concurrent page requests.
    pub fan_out: usize,
    pub fetch_retry: RetryPolicy,
    /// Retry schedule for the load stage while storage is unavailable.
    pub load_retry: RetryPolicy,
    /// How far back the fetch and the projection look.
    pub window: ChronoDuration,
    pub alert_threshold: f64,
    pub breakpoints: Breakpoints,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            pollutant: "pm25".to_string(),
            page_size: 1000,
            max_pages: 10,
            fan_out: 4,
            fetch_retry: RetryPolicy::default(),
            load_retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(10),
            },
            window: ChronoDuration::hours(24),
            alert_threshold: 100.0,
            breakpoints: Breakpoints::default(),
        }
    }
}

/// Stage names, as recorded in a run's transition history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    Fetching,
    Normalizing,
    Loading,
    Ready,
    Failed,
}

impl Stage {
    // ---
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Idle => "idle",
            Stage::Fetching => "fetching",
            Stage::Normalizing => "normalizing",
            Stage::Loading => "loading",
            Stage::Ready => "ready",
            Stage::Failed => "failed",
        }
    }
}

/// Read-time view of the store: rankings, alerts and window statistics.
#[derive(Debug, Clone, Serialize)]
pub struct Projection {
    // ---
    pub since: DateTime<Utc>,
    pub summaries: Vec<LocationSummary>,
    pub alerts: Vec<Alert>,
    pub stats: Option<SummaryStats>,
}

#[derive(Debug)]
pub enum RunState {
    Idle,
    Fetching,
    Normalizing,
    Loading,
    Ready(Projection),
    Failed(PipelineError),
}

impl RunState {
    // ---
    pub fn stage(&self) -> Stage {
        match self {
            RunState::Idle => Stage::Idle,
            RunState::Fetching => Stage::Fetching,
            RunState::Normalizing => Stage::Normalizing,
            RunState::Loading => Stage::Loading,
            RunState::Ready(_) => Stage::Ready,
            RunState::Failed(_) => Stage::Failed,
        }
    }
}

/// Counters collected while a run progresses.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStats {
    // ---
    pub pages_fetched: u32,
    pub records_fetched: usize,
    /// Some pages could not be fetched; what was gathered was still loaded.
    pub partial_fetch: bool,
    pub clean: usize,
    pub rejected: usize,
    pub skipped: usize,
    pub inserted: u64,
    pub load_attempts: u32,
}

/// Structured outcome of one pipeline run.
#[derive(Debug)]
pub struct RunReport {
    // ---
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub state: RunState,
    pub stats: RunStats,
    pub transitions: Vec<Stage>,
}

impl RunReport {
    // ---
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            finished_at: None,
            state: RunState::Idle,
            stats: RunStats::default(),
            transitions: vec![Stage::Idle],
        }
    }

    fn enter(&mut self, state: RunState) {
        self.transitions.push(state.stage());
        self.state = state;
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, RunState::Ready(_))
    }

    pub fn projection(&self) -> Option<&Projection> {
        match &self.state {
            RunState::Ready(p) => Some(p),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&PipelineError> {
        match &self.state {
            RunState::Failed(e) => Some(e),
            _ => None,
        }
    }
}

pub struct Pipeline<S, St> {
    // ---
    fetcher: Fetcher<S>,
    normalizer: Normalizer,
    store: St,
    settings: PipelineSettings,
}

impl<S: MeasurementSource, St: MeasurementStore> Pipeline<S, St> {
    // ---
    pub fn new(source: S, store: St, settings: PipelineSettings) -> Self {
        Self {
            fetcher: Fetcher::new(source, settings.fetch_retry, settings.fan_out),
            normalizer: Normalizer::new(&settings.pollutant),
            store,
            settings,
        }
    }

    pub fn store(&self) -> &St {
        &self.store
    }

    pub fn source(&self) -> &S {
        self.fetcher.source()
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Execute one run from `Idle` to a terminal state.
    pub async fn run(&self, cancel: &CancellationToken) -> RunReport {
        // ---
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline_run", %run_id, pollutant = %self.normalizer.pollutant());

        async {
            let mut report = RunReport::new(run_id);
            info!("Starting pipeline run");

            match self.execute(&mut report, cancel).await {
                Ok(projection) => {
                    info!(
                        inserted = report.stats.inserted,
                        rejected = report.stats.rejected,
                        partial = report.stats.partial_fetch,
                        locations = projection.summaries.len(),
                        alerts = projection.alerts.len(),
                        "Pipeline run ready"
                    );
                    report.enter(RunState::Ready(projection));
                }
                Err(e) => {
                    error!(kind = e.kind(), error = %e, stage = report.state.stage().name(), "Pipeline run failed");
                    report.enter(RunState::Failed(e));
                }
            }

            report.finished_at = Some(Utc::now());
            report
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        report: &mut RunReport,
        cancel: &CancellationToken,
    ) -> Result<Projection, PipelineError> {
        // ---
        let since = self.window_start()?;

        advance(report, RunState::Fetching, cancel)?;
        let FetchOutcome {
            records,
            pages_fetched,
            partial,
            failure,
        } = self
            .fetcher
            .fetch_since(
                self.normalizer.pollutant(),
                self.settings.page_size,
                self.settings.max_pages,
                Some(since),
            )
            .await?;
        report.stats.pages_fetched = pages_fetched;
        report.stats.records_fetched = records.len();
        report.stats.partial_fetch = partial;
        if pages_fetched == 0 {
            // Nothing came back at all: a total failure, not a partial one.
            if let Some(e) = failure {
                return Err(e.into());
            }
        }

        advance(report, RunState::Normalizing, cancel)?;
        let normalized = self.normalizer.normalize(&records)?;
        report.stats.clean = normalized.measurements.len();
        report.stats.rejected = normalized.rejected;
        report.stats.skipped = normalized.skipped;

        advance(report, RunState::Loading, cancel)?;
        let mut measurements = normalized.measurements;
        let inserted = self.load(&mut measurements, &mut report.stats).await?;
        report.stats.inserted = inserted;
        let projection = self
            .with_store_retry("query", || self.project_since(since))
            .await
            .map(|(p, _)| p)?;

        check_cancelled(cancel, Stage::Ready)?;
        Ok(projection)
    }

    async fn load(
        &self,
        measurements: &mut [Measurement],
        stats: &mut RunStats,
    ) -> Result<u64, PipelineError> {
        // ---
        let loaded_at = Utc::now();
        for m in measurements.iter_mut() {
            m.ingested_at = loaded_at;
        }

        let batch: &[Measurement] = measurements;
        let (inserted, attempts) = self
            .with_store_retry("upsert", || self.store.upsert(batch))
            .await?;
        stats.load_attempts = attempts;
        Ok(inserted)
    }

    /// Retry a store operation while storage reports itself unavailable.
    async fn with_store_retry<T, F, Fut>(
        &self,
        op: &'static str,
        mut f: F,
    ) -> Result<(T, u32), PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, StoreError>>,
    {
        // ---
        let policy = self.settings.load_retry;
        let max_attempts = policy.attempts();
        let mut attempt = 1;

        loop {
            match f().await {
                Ok(value) => return Ok((value, attempt)),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = policy.delay_for(attempt);
                    warn!(op, attempt, max_attempts, error = %e, "Storage unavailable, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) if e.is_retryable() => {
                    return Err(PipelineError::StorageUnavailable {
                        attempts: attempt,
                        source: e,
                    })
                }
                Err(e) => return Err(PipelineError::Storage(e)),
            }
        }
    }

    /// Stored measurements for the tracked pollutant at or after `since`.
    pub async fn measurements_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<Measurement>, StoreError> {
        self.store
            .query_latest(self.normalizer.pollutant(), since)
            .await
    }

    /// Projection over the configured window ending now.
    pub async fn project(&self) -> Result<Projection, PipelineError> {
        // ---
        let since = self.window_start()?;
        self.project_since(since).await.map_err(PipelineError::Storage)
    }

    fn window_start(&self) -> Result<DateTime<Utc>, PipelineError> {
        window_start(Utc::now(), self.settings.window).ok_or(PipelineError::InvalidWindow {
            hours: self.settings.window.num_hours(),
        })
    }

    pub async fn project_since(&self, since: DateTime<Utc>) -> Result<Projection, StoreError> {
        // ---
        let measurements = self.measurements_since(since).await?;
        Ok(Projection {
            since,
            summaries: rank(&measurements, &self.settings.breakpoints),
            alerts: detect_alerts(&measurements, self.settings.alert_threshold),
            stats: summary_stats(&measurements),
        })
    }

    /// Run the pipeline every `every` until `cancel` fires.
    pub async fn run_scheduled(&self, every: Duration, cancel: &CancellationToken) {
        // ---
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Scheduler stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let report = self.run(cancel).await;
                    if let Some(e) = report.error() {
                        warn!(run_id = %report.run_id, kind = e.kind(), "Scheduled run failed");
                    }
                }
            }
        }
    }
}

fn check_cancelled(cancel: &CancellationToken, next: Stage) -> Result<(), PipelineError> {
    // ---
    if cancel.is_cancelled() {
        return Err(PipelineError::Aborted { stage: next.name() });
    }
    Ok(())
}

fn advance(
    report: &mut RunReport,
    next: RunState,
    cancel: &CancellationToken,
) -> Result<(), PipelineError> {
    // ---
    check_cancelled(cancel, next.stage())?;
    report.enter(next);
    Ok(())
}
