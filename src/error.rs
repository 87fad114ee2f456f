//! Error taxonomy for the pipeline stages.
//!
//! Malformed individual records are not errors: the normalizer rejects and
//! counts them. Duplicate keys are not errors either: the store absorbs them.

use thiserror::Error;

// ---

/// Errors raised while talking to the remote measurement source.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Authentication rejected by source (status {status})")]
    Auth { status: u16 },

    #[error("Missing API credential")]
    MissingCredential,

    #[error("Rate limited by source")]
    RateLimited {
        /// Minimum delay requested by the source via `Retry-After`, in seconds.
        retry_after: Option<u64>,
    },

    #[error("Source returned status {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Malformed page payload: {0}")]
    MalformedBatch(String),

    #[error("Network request failed")]
    Transport(#[from] reqwest::Error),
}

impl FetchError {
    // ---
    /// Whether the retry policy should attempt the page again.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::RateLimited { .. } => true,
            FetchError::Transport(e) => e.is_timeout() || e.is_connect(),
            FetchError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, FetchError::Auth { .. } | FetchError::MissingCredential)
    }
}

/// Batch-level normalization failure.
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("Malformed batch: element {index} is not a measurement object")]
    MalformedBatch { index: usize },
}

/// Errors raised by a measurement store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage unavailable")]
    Unavailable(#[source] sqlx::Error),

    #[error("Storage query failed")]
    Database(#[source] sqlx::Error),
}

impl StoreError {
    // ---
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        // ---
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::Unavailable(err),
            other => StoreError::Database(other),
        }
    }
}

/// Terminal failure reason of a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Authentication failed: {0}")]
    Auth(#[source] FetchError),

    #[error("Fetch failed: {0}")]
    Fetch(#[source] FetchError),

    #[error(transparent)]
    MalformedBatch(#[from] NormalizeError),

    #[error("Storage unavailable after {attempts} attempts")]
    StorageUnavailable {
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error("Storage failure: {0}")]
    Storage(#[source] StoreError),

    #[error("Run aborted before {stage}")]
    Aborted { stage: &'static str },

    #[error("Query window of {hours}h reaches outside the supported time range")]
    InvalidWindow { hours: i64 },
}

impl PipelineError {
    // ---
    /// Stable machine-readable kind, preserved in the run result.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Auth(_) => "auth",
            PipelineError::Fetch(FetchError::RateLimited { .. }) => "rate_limited",
            PipelineError::Fetch(FetchError::MalformedBatch(_)) => "malformed_batch",
            PipelineError::Fetch(_) => "fetch",
            PipelineError::MalformedBatch(_) => "malformed_batch",
            PipelineError::StorageUnavailable { .. } => "storage_unavailable",
            PipelineError::Storage(_) => "storage",
            PipelineError::Aborted { .. } => "aborted",
            PipelineError::InvalidWindow { .. } => "invalid_window",
        }
    }
}

impl From<FetchError> for PipelineError {
    fn from(err: FetchError) -> Self {
        if err.is_auth() {
            PipelineError::Auth(err)
        } else {
            PipelineError::Fetch(err)
        }
    }
}
