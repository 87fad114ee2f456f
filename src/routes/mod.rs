//! HTTP gateway: merges every sub-router and attaches the shared state.
//!
//! Sub-modules only know the state tuple; `main.rs` only knows `router`.

use std::sync::Arc;

use axum::Router;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::pipeline::Pipeline;
use crate::source::MeasurementSource;
use crate::store::MeasurementStore;

mod health;
mod readings;
mod run;

// ---

/// State shared by every route: the pipeline and the shutdown token.
pub type AppState<S, St> = (Arc<Pipeline<S, St>>, CancellationToken);

/// JSON error body returned by failing endpoints.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub message: String,
}

pub fn router<S, St>(pipeline: Arc<Pipeline<S, St>>, shutdown: CancellationToken) -> Router
where
    S: MeasurementSource + 'static,
    St: MeasurementStore + 'static,
{
    // ---
    Router::new()
        .merge(run::router())
        .merge(readings::router())
        .merge(health::router())
        .with_state((pipeline, shutdown))
}
