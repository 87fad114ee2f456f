//! Paginated fetch with bounded retry and bounded concurrent fan-out.
//!
//! Pages are requested in windows of `fan_out` concurrent requests and then
//! consumed strictly in page order, so arrival order never leaks into the
//! result. A page that still fails after the retry budget ends the fetch with
//! whatever was gathered so far and the partial flag set. Authentication
//! failures abort immediately.

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::source::{MeasurementSource, PageQuery, RawPage};

// ---

/// Bounded-attempt retry schedule for a single page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    // ---
    /// Total attempts per page, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    // ---
    /// Delay to wait after the given failed attempt (1-based): `base * 2^(attempt-1)`, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        // ---
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Result of a fetch for one pollutant.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    // ---
    pub records: Vec<Value>,
    pub pages_fetched: u32,
    /// Set when a page failed after exhausting retries.
    pub partial: bool,
    /// The error that ended a partial fetch.
    pub failure: Option<FetchError>,
}

pub struct Fetcher<S> {
    // ---
    source: S,
    retry: RetryPolicy,
    fan_out: usize,
}

impl<S: MeasurementSource> Fetcher<S> {
    // ---
    pub fn new(source: S, retry: RetryPolicy, fan_out: usize) -> Self {
        Self {
            source,
            retry,
            fan_out: fan_out.max(1),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Fetch every page for `pollutant`, up to `max_pages`.
    pub async fn fetch(
        &self,
        pollutant: &str,
        page_size: u32,
        max_pages: u32,
    ) -> Result<FetchOutcome, FetchError> {
        self.fetch_since(pollutant, page_size, max_pages, None).await
    }

    /// Like [`Fetcher::fetch`], restricted to readings at or after `date_from`.
    pub async fn fetch_since(
        &self,
        pollutant: &str,
        page_size: u32,
        max_pages: u32,
        date_from: Option<DateTime<Utc>>,
    ) -> Result<FetchOutcome, FetchError> {
        // ---
        let mut outcome = FetchOutcome::default();
        let mut next_page = 1u32;

        'pages: while next_page <= max_pages {
            let window_end = next_page
                .saturating_add(self.fan_out as u32 - 1)
                .min(max_pages);

            let queries: Vec<PageQuery> = (next_page..=window_end)
                .map(|page| PageQuery {
                    pollutant: pollutant.to_string(),
                    page,
                    page_size,
                    date_from,
                })
                .collect();

            let results = join_all(queries.iter().map(|q| self.fetch_with_retry(q))).await;

            for (query, result) in queries.iter().zip(results) {
                match result {
                    Ok(page) => {
                        outcome.pages_fetched += 1;
                        let last = page.is_last(query);
                        debug!(
                            page = query.page,
                            records = page.records.len(),
                            last,
                            "Page received"
                        );
                        outcome.records.extend(page.records);
                        if last {
                            break 'pages;
                        }
                    }
                    Err(e) if e.is_auth() => return Err(e),
                    Err(e) => {
                        warn!(
                            page = query.page,
                            error = %e,
                            gathered = outcome.records.len(),
                            "Page failed after retries, returning partial result"
                        );
                        outcome.partial = true;
                        outcome.failure = Some(e);
                        break 'pages;
                    }
                }
            }

            if window_end == max_pages {
                debug!(
                    "Hit page limit of {}, stopping pagination. Fetched {} records so far.",
                    max_pages,
                    outcome.records.len()
                );
            }
            next_page = window_end + 1;
        }

        info!(
            records = outcome.records.len(),
            pages = outcome.pages_fetched,
            partial = outcome.partial,
            "Finished fetching"
        );
        Ok(outcome)
    }

    async fn fetch_with_retry(&self, query: &PageQuery) -> Result<RawPage, FetchError> {
        // ---
        let max_attempts = self.retry.attempts();
        let mut attempt = 1;

        loop {
            match self.source.fetch_page(query).await {
                Ok(page) => return Ok(page),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let mut delay = self.retry.delay_for(attempt);
                    if let FetchError::RateLimited {
                        retry_after: Some(secs),
                    } = &e
                    {
                        // Honour the server's hint, but never past the policy cap.
                        delay = delay
                            .max(Duration::from_secs(*secs))
                            .min(self.retry.max_delay);
                    }
                    warn!(
                        page = query.page,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying page"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
