use axum::{
    extract::State, http::StatusCode, response::IntoResponse, response::Response, routing::post,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use super::{AppState, ErrorBody};
use crate::pipeline::{Projection, RunStats, Stage};
use crate::source::MeasurementSource;
use crate::store::MeasurementStore;

// ---

pub fn router<S, St>() -> Router<AppState<S, St>>
where
    S: MeasurementSource + 'static,
    St: MeasurementStore + 'static,
{
    // ---
    Router::new().route("/pipeline/run", post(handler::<S, St>))
}

#[derive(Serialize)]
struct RunResponse<'a> {
    // ---
    run_id: Uuid,
    stage: Stage,
    transitions: &'a [Stage],
    stats: &'a RunStats,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a Projection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorBody>,
}

/// Handle `POST /pipeline/run`: one full run, reported as JSON.
///
/// Returns 200 when the run reached `Ready` and 502 when it ended in `Failed`.
async fn handler<S, St>(State((pipeline, shutdown)): State<AppState<S, St>>) -> Response
where
    S: MeasurementSource + 'static,
    St: MeasurementStore + 'static,
{
    // ---
    info!("POST /pipeline/run - Starting pipeline");

    let report = pipeline.run(&shutdown).await;

    let error = report.error().map(|e| ErrorBody {
        kind: e.kind(),
        message: e.to_string(),
    });
    let status = if report.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };

    let body = RunResponse {
        run_id: report.run_id,
        stage: report.state.stage(),
        transitions: &report.transitions,
        stats: &report.stats,
        started_at: report.started_at,
        finished_at: report.finished_at,
        result: report.projection(),
        error,
    };

    (status, Json(body)).into_response()
}
