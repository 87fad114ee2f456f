//! Application entry point for the `airwatch` service.
//!
//! This binary orchestrates the full startup sequence for the air-quality
//! pipeline, including:
//! - Loading `.env` so every variable below, logging ones included, can live there
//! - Initializing structured logging/tracing
//! - Loading configuration from environment variables
//! - Establishing a PostgreSQL connection pool
//! - Creating the database schema if it does not exist
//! - Building the pipeline (OpenAQ source + Postgres store)
//! - Optionally scheduling periodic runs
//! - Mounting all API routes via the `routes` gateway and serving requests
//!
//! # Environment Variables
//! - `DATABASE_URL` (**required**) – PostgreSQL connection string
//! - `OPENAQ_API_KEY` (**required**) – measurement API credential
//! - `AIRWATCH_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `AIRWATCH_SPAN_EVENTS` (optional) – span event mode for tracing
//!
//! See `config.rs` for the full list of pipeline settings.
use std::{env, io::IsTerminal, net::SocketAddr, sync::Arc, time::Duration};

use axum::Router;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use anyhow::{Context, Result};

use airwatch::{config, routes, schema, OpenAqClient, PgStore, Pipeline};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    init_tracing();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let pool = PgPoolOptions::new()
        .max_connections(cfg.db_pool_max)
        .connect(&cfg.db_url)
        .await
        .context("Failed to connect to database")?;

    tracing::info!("Successfully connected to database");

    schema::create_schema(&pool).await?;

    let source = OpenAqClient::new(&cfg.api_url, &cfg.api_key, cfg.request_timeout())
        .context("Failed to build measurement API client")?;
    let pipeline = Arc::new(Pipeline::new(
        source,
        PgStore::new(pool.clone()),
        cfg.pipeline_settings(),
    ));

    let shutdown = CancellationToken::new();

    if cfg.pipeline_interval_secs > 0 {
        let every = Duration::from_secs(u64::from(cfg.pipeline_interval_secs));
        let pipeline = Arc::clone(&pipeline);
        let shutdown = shutdown.clone();
        tracing::info!("Scheduling pipeline every {:?}", every);
        tokio::spawn(async move { pipeline.run_scheduled(every, &shutdown).await });
    }

    // Build app from routes gateway
    let app: Router = routes::router(pipeline, shutdown.clone());

    let addr: SocketAddr = cfg
        .listen_addr
        .parse()
        .with_context(|| format!("Invalid LISTEN_ADDR '{}'", cfg.listen_addr))?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    pool.close().await;
    Ok(())
}

// ---

/// Resolve on Ctrl+C and cancel in-flight work; runs stop at the next stage boundary.
async fn shutdown_signal(shutdown: CancellationToken) {
    // ---
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    tracing::info!("Shutdown requested");
    shutdown.cancel();
}

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `AIRWATCH_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by `RUST_LOG`, falling back to `AIRWATCH_LOG_LEVEL`
///
/// Called once at startup, before any logging macros are invoked.
fn init_tracing() {
    // ---
    let span_events = match env::var("AIRWATCH_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(default_log_directive())
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}

/// Filter used when `RUST_LOG` is unset, from `AIRWATCH_LOG_LEVEL` (default `debug`).
fn default_log_directive() -> String {
    // ---
    let level = match env::var("AIRWATCH_LOG_LEVEL").ok().as_deref() {
        Some("trace") => "trace",
        Some("debug") => "debug",
        Some("info") => "info",
        Some("warn") => "warn",
        Some("error") => "error",
        _ => "debug",
    };
    format!("{level},sqlx::query=warn,hyper=info,reqwest=info")
}
