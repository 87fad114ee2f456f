//! Durable measurement storage with duplicate suppression.
//!
//! Every `upsert` call is one write transaction: readers see either none or all
//! of a batch, and a row whose natural key already exists is skipped silently.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::StoreError;
use crate::models::{Measurement, MeasurementRow, NaturalKey};

/// Rows per multi-row INSERT; nine binds each stays well under the
/// 65535-parameter limit of the Postgres protocol.
const INSERT_CHUNK_ROWS: usize = 1000;

// ---

#[async_trait]
pub trait MeasurementStore: Send + Sync {
    /// Insert new measurements, returning how many rows were actually added.
    async fn upsert(&self, measurements: &[Measurement]) -> Result<u64, StoreError>;

    /// Measurements at or after `since`, newest first, then by `location_id`.
    async fn query_latest(
        &self,
        pollutant: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Measurement>, StoreError>;

    /// Total number of stored rows.
    async fn count(&self) -> Result<u64, StoreError>;
}

#[async_trait]
impl<T: MeasurementStore + ?Sized> MeasurementStore for Arc<T> {
    async fn upsert(&self, measurements: &[Measurement]) -> Result<u64, StoreError> {
        (**self).upsert(measurements).await
    }

    async fn query_latest(
        &self,
        pollutant: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Measurement>, StoreError> {
        (**self).query_latest(pollutant, since).await
    }

    async fn count(&self) -> Result<u64, StoreError> {
        (**self).count().await
    }
}

/// PostgreSQL-backed store over the `measurements` table.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    // ---
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MeasurementStore for PgStore {
    async fn upsert(&self, measurements: &[Measurement]) -> Result<u64, StoreError> {
        // ---
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for chunk in measurements.chunks(INSERT_CHUNK_ROWS) {
            let mut query = QueryBuilder::<Postgres>::new(
                "INSERT INTO measurements (location_id, location_name, latitude, longitude, \
                 pollutant, value, unit, observed_at, ingested_at) ",
            );
            query.push_values(chunk, |mut row, m| {
                let (latitude, longitude) = match m.coordinates {
                    Some(c) => (Some(c.latitude), Some(c.longitude)),
                    None => (None, None),
                };
                row.push_bind(&m.location_id)
                    .push_bind(&m.location_name)
                    .push_bind(latitude)
                    .push_bind(longitude)
                    .push_bind(&m.pollutant)
                    .push_bind(m.value)
                    .push_bind(&m.unit)
                    .push_bind(m.observed_at)
                    .push_bind(m.ingested_at);
            });
            query.push(" ON CONFLICT (location_id, pollutant, observed_at) DO NOTHING");

            inserted += query.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        debug!(
            inserted,
            skipped = measurements.len() as u64 - inserted,
            "Upsert committed"
        );
        Ok(inserted)
    }

    async fn query_latest(
        &self,
        pollutant: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Measurement>, StoreError> {
        // ---
        let rows: Vec<MeasurementRow> = sqlx::query_as(
            r#"
            SELECT location_id, location_name, latitude, longitude,
                   pollutant, value, unit, observed_at, ingested_at
            FROM measurements
            WHERE pollutant = $1 AND observed_at >= $2
            ORDER BY observed_at DESC, location_id ASC
            "#,
        )
        .bind(pollutant)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Measurement::from).collect())
    }

    async fn count(&self) -> Result<u64, StoreError> {
        // ---
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM measurements")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as u64)
    }
}

/// In-process store keyed by natural key.
///
/// A batch is applied under a single write guard, so concurrent readers never
/// observe half of it.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: RwLock<BTreeMap<NaturalKey, Measurement>>,
}

impl MemoryStore {
    // ---
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MeasurementStore for MemoryStore {
    async fn upsert(&self, measurements: &[Measurement]) -> Result<u64, StoreError> {
        // ---
        let mut rows = self.rows.write().await;
        let mut inserted = 0;
        for m in measurements {
            let key = m.natural_key();
            if !rows.contains_key(&key) {
                rows.insert(key, m.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn query_latest(
        &self,
        pollutant: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Measurement>, StoreError> {
        // ---
        let rows = self.rows.read().await;
        let mut out: Vec<Measurement> = rows
            .values()
            .filter(|m| m.pollutant == pollutant && m.observed_at >= since)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.observed_at
                .cmp(&a.observed_at)
                .then_with(|| a.location_id.cmp(&b.location_id))
        });
        Ok(out)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.rows.read().await.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::CANONICAL_UNIT;
    use chrono::{Duration, TimeZone};

    fn create_test_measurement(location_id: &str, value: f64, hours: i64) -> Measurement {
        // ---
        let base = Utc.with_ymd_and_hms(2025, 3, 26, 0, 0, 0).unwrap();
        Measurement {
            location_id: location_id.to_string(),
            location_name: location_id.to_uppercase(),
            coordinates: None,
            pollutant: "pm25".to_string(),
            value,
            unit: CANONICAL_UNIT.to_string(),
            observed_at: base + Duration::hours(hours),
            ingested_at: Utc::now(),
        }
    }

    #[test]
    fn test_upsert_is_idempotent() {
        // ---
        tokio_test::block_on(async {
            let store = MemoryStore::new();
            let batch = vec![
                create_test_measurement("a", 1.0, 0),
                create_test_measurement("a", 2.0, 1),
                create_test_measurement("b", 3.0, 0),
            ];

            assert_eq!(store.upsert(&batch).await.unwrap(), 3);
            assert_eq!(store.upsert(&batch).await.unwrap(), 0);
            assert_eq!(store.count().await.unwrap(), 3);
        });
    }

    #[test]
    fn test_duplicate_key_keeps_first_row() {
        // ---
        tokio_test::block_on(async {
            let store = MemoryStore::new();
            let first = create_test_measurement("a", 1.0, 0);
            let mut again = first.clone();
            again.value = 50.0;

            assert_eq!(store.upsert(&[first, again]).await.unwrap(), 1);
            let rows = store
                .query_latest("pm25", Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap())
                .await
                .unwrap();
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].value, 1.0);
        });
    }

    #[test]
    fn test_query_latest_filters_and_orders() {
        // ---
        tokio_test::block_on(async {
            let store = MemoryStore::new();
            let mut other = create_test_measurement("a", 9.0, 5);
            other.pollutant = "o3".to_string();
            store
                .upsert(&[
                    create_test_measurement("b", 1.0, 2),
                    create_test_measurement("a", 1.0, 2),
                    create_test_measurement("c", 1.0, 3),
                    create_test_measurement("a", 1.0, 0),
                    other,
                ])
                .await
                .unwrap();

            let since = Utc.with_ymd_and_hms(2025, 3, 26, 2, 0, 0).unwrap();
            let rows = store.query_latest("pm25", since).await.unwrap();
            let keys: Vec<(&str, i64)> = rows
                .iter()
                .map(|m| {
                    (
                        m.location_id.as_str(),
                        (m.observed_at - Utc.with_ymd_and_hms(2025, 3, 26, 0, 0, 0).unwrap())
                            .num_hours(),
                    )
                })
                .collect();
            assert_eq!(keys, vec![("c", 3), ("a", 2), ("b", 2)]);
        });
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_overlapping_writers() {
        // ---
        let store = Arc::new(MemoryStore::new());
        let batch: Vec<Measurement> = (0..50)
            .map(|i| create_test_measurement(&format!("loc-{i}"), i as f64, 0))
            .collect();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                let batch = batch.clone();
                tokio::spawn(async move { store.upsert(&batch).await.unwrap() })
            })
            .collect();

        let mut total = 0;
        for h in handles {
            total += h.await.unwrap();
        }
        assert_eq!(total, 50);
        assert_eq!(store.count().await.unwrap(), 50);
    }
}
