//! Read-only projections for the presentation layer.
//!
//! Every request recomputes from the store; nothing here writes.

use axum::{
    extract::Query, extract::State, http::StatusCode, response::IntoResponse, response::Response,
    routing::get, Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::{AppState, ErrorBody};
use crate::error::StoreError;
use crate::pipeline::{window_start, Pipeline, MAX_WINDOW_HOURS};
use crate::ranker::{detect_alerts, rank, summary_stats, top_polluted, LocationAverage, SummaryStats};
use crate::source::MeasurementSource;
use crate::store::MeasurementStore;

// ---

pub fn router<S, St>() -> Router<AppState<S, St>>
where
    S: MeasurementSource + 'static,
    St: MeasurementStore + 'static,
{
    // ---
    Router::new()
        .route("/rankings", get(rankings::<S, St>))
        .route("/alerts", get(alerts::<S, St>))
        .route("/stats", get(stats::<S, St>))
}

/// Query parameters for `/rankings`
#[derive(Debug, Deserialize)]
pub struct RankingsQuery {
    /// Look-back window in hours (default: configured window).
    hours: Option<u32>,
    limit: Option<usize>,
}

/// Query parameters for `/alerts`
#[derive(Debug, Deserialize)]
pub struct AlertsQuery {
    hours: Option<u32>,
    /// Alert level in µg/m³ (default: configured threshold).
    threshold: Option<f64>,
    limit: Option<usize>,
}

/// Query parameters for `/stats`
#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    hours: Option<u32>,
    /// Number of top locations by mean value (default: 10).
    top: Option<usize>,
}

#[derive(Serialize)]
struct StatsResponse {
    since: DateTime<Utc>,
    stored_rows: u64,
    summary: Option<SummaryStats>,
    top_polluted: Vec<LocationAverage>,
}

async fn rankings<S, St>(
    Query(params): Query<RankingsQuery>,
    State((pipeline, _)): State<AppState<S, St>>,
) -> Response
where
    S: MeasurementSource + 'static,
    St: MeasurementStore + 'static,
{
    // ---
    debug!("GET /rankings {:?}", params);
    let since = match requested_since(&pipeline, params.hours) {
        Ok(since) => since,
        Err(resp) => return resp,
    };

    match pipeline.measurements_since(since).await {
        Ok(measurements) => {
            let mut ranked = rank(&measurements, &pipeline.settings().breakpoints);
            ranked.truncate(params.limit.unwrap_or(1000));
            (StatusCode::OK, Json(ranked)).into_response()
        }
        Err(e) => storage_failure(e),
    }
}

async fn alerts<S, St>(
    Query(params): Query<AlertsQuery>,
    State((pipeline, _)): State<AppState<S, St>>,
) -> Response
where
    S: MeasurementSource + 'static,
    St: MeasurementStore + 'static,
{
    // ---
    debug!("GET /alerts {:?}", params);
    let threshold = params
        .threshold
        .unwrap_or(pipeline.settings().alert_threshold);
    if !threshold.is_finite() {
        let body = ErrorBody {
            kind: "bad_request",
            message: "threshold must be a finite number".to_string(),
        };
        return (StatusCode::BAD_REQUEST, Json(body)).into_response();
    }
    let since = match requested_since(&pipeline, params.hours) {
        Ok(since) => since,
        Err(resp) => return resp,
    };

    match pipeline.measurements_since(since).await {
        Ok(measurements) => {
            let mut found = detect_alerts(&measurements, threshold);
            found.truncate(params.limit.unwrap_or(1000));
            (StatusCode::OK, Json(found)).into_response()
        }
        Err(e) => storage_failure(e),
    }
}

async fn stats<S, St>(
    Query(params): Query<StatsQuery>,
    State((pipeline, _)): State<AppState<S, St>>,
) -> Response
where
    S: MeasurementSource + 'static,
    St: MeasurementStore + 'static,
{
    // ---
    debug!("GET /stats {:?}", params);
    let since = match requested_since(&pipeline, params.hours) {
        Ok(since) => since,
        Err(resp) => return resp,
    };

    let result = async {
        let measurements = pipeline.measurements_since(since).await?;
        let stored_rows = pipeline.store().count().await?;
        Ok::<_, StoreError>(StatsResponse {
            since,
            stored_rows,
            summary: summary_stats(&measurements),
            top_polluted: top_polluted(&measurements, params.top.unwrap_or(10)),
        })
    }
    .await;

    match result {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(e) => storage_failure(e),
    }
}

/// Start of the look-back window, or a 400 response when `hours` is out of range.
fn requested_since<S, St>(
    pipeline: &Pipeline<S, St>,
    hours: Option<u32>,
) -> Result<DateTime<Utc>, Response>
where
    S: MeasurementSource,
    St: MeasurementStore,
{
    // ---
    let window = match hours {
        Some(h) if h > MAX_WINDOW_HOURS => None,
        Some(h) => Some(Duration::hours(i64::from(h))),
        None => Some(pipeline.settings().window),
    };

    window
        .and_then(|w| window_start(Utc::now(), w))
        .ok_or_else(|| {
            let body = ErrorBody {
                kind: "bad_request",
                message: format!("hours must be at most {MAX_WINDOW_HOURS}"),
            };
            (StatusCode::BAD_REQUEST, Json(body)).into_response()
        })
}

fn storage_failure(e: StoreError) -> Response {
    // ---
    error!("Failed to read measurements: {}", e);
    let body = ErrorBody {
        kind: if e.is_retryable() {
            "storage_unavailable"
        } else {
            "storage"
        },
        message: e.to_string(),
    };
    (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
}
