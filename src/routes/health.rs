// src/routes/health.rs
//! Liveness endpoint for the airwatch service.
//!
//! Used by container orchestrators and CI to check that the process is up and
//! serving HTTP. It never touches the database or the remote source, so it
//! stays green while either of them is down; pipeline health is reported by
//! `POST /pipeline/run` itself.

use axum::{routing::get, Json, Router};
use serde::Serialize;

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

/// Handle `GET /health`.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Sub-router with the `/health` route, generic over the gateway state.
pub fn router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/health", get(health))
}
