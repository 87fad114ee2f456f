//! Database schema management for `airwatch`.
//!
//! Ensures the measurement table and its indexes exist before the pipeline or
//! the read endpoints touch the database. Applied once on startup from `main.rs`.

use anyhow::Result;
use sqlx::PgPool;

// ---

/// Create or update the database schema (idempotent).
///
/// The composite primary key is the measurement natural key; it is what lets
/// `INSERT ... ON CONFLICT DO NOTHING` make repeated loads a no-op. Extra
/// indexes serve the `observed_at` range scans and `location_id` lookups.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS measurements (
            location_id   TEXT             NOT NULL,
            location_name TEXT             NOT NULL,
            latitude      DOUBLE PRECISION,
            longitude     DOUBLE PRECISION,
            pollutant     TEXT             NOT NULL,
            value         DOUBLE PRECISION NOT NULL CHECK (value >= 0),
            unit          TEXT             NOT NULL,
            observed_at   TIMESTAMPTZ      NOT NULL,
            ingested_at   TIMESTAMPTZ      NOT NULL,
            PRIMARY KEY (location_id, pollutant, observed_at)
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_measurements_pollutant_observed_at
            ON measurements (pollutant, observed_at DESC);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_measurements_location_id
            ON measurements (location_id);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
