//! `airwatch`: batch ETL for air-quality measurements.
//!
//! A run pulls paginated readings from the remote source (`source`,
//! `fetcher`), coerces them into the canonical `Measurement` shape
//! (`normalizer`), loads them idempotently (`store`), and projects rankings and
//! threshold alerts from whatever is stored (`ranker`). `pipeline` sequences
//! the stages and always returns a structured `RunReport`.
//!
//! The binary in `main.rs` wires these together with PostgreSQL and serves
//! the read-only projections over HTTP (`routes`).

pub mod config;
pub mod error;
pub mod fetcher;
pub mod models;
pub mod normalizer;
pub mod pipeline;
pub mod ranker;
pub mod routes;
pub mod schema;
pub mod source;
pub mod store;

pub use config::Config;
pub use error::{FetchError, NormalizeError, PipelineError, StoreError};
pub use fetcher::{FetchOutcome, Fetcher, RetryPolicy};
pub use models::{AirStatus, Alert, Coordinates, LocationSummary, Measurement, NaturalKey};
pub use normalizer::{Normalized, Normalizer};
pub use pipeline::{Pipeline, PipelineSettings, Projection, RunReport, RunState, RunStats, Stage};
pub use ranker::{Breakpoints, SummaryStats};
pub use source::{MeasurementSource, OpenAqClient, PageQuery, RawPage};
pub use store::{MeasurementStore, MemoryStore, PgStore};
