//! Canonical data models for the air-quality pipeline.
//!
//! `Measurement` is the only stored shape. `LocationSummary` and `Alert` are
//! read-time projections recomputed from the store on every request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---

/// Canonical concentration unit for particulate pollutants.
pub const CANONICAL_UNIT: &str = "µg/m³";

/// Geographic position reported by the source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    // ---
    pub latitude: f64,
    pub longitude: f64,
}

/// One cleaned reading, as produced by the normalizer and persisted by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    // ---
    pub location_id: String,
    pub location_name: String,
    pub coordinates: Option<Coordinates>,
    pub pollutant: String,
    pub value: f64,
    pub unit: String,
    pub observed_at: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
}

/// Natural key of a measurement: at most one stored row per key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NaturalKey {
    // ---
    pub location_id: String,
    pub pollutant: String,
    pub observed_at: DateTime<Utc>,
}

impl Measurement {
    // ---
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey {
            location_id: self.location_id.clone(),
            pollutant: self.pollutant.clone(),
            observed_at: self.observed_at,
        }
    }
}

/// Flat row shape of the `measurements` table.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct MeasurementRow {
    // ---
    pub location_id: String,
    pub location_name: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub pollutant: String,
    pub value: f64,
    pub unit: String,
    pub observed_at: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
}

impl From<MeasurementRow> for Measurement {
    fn from(row: MeasurementRow) -> Self {
        // ---
        let coordinates = match (row.latitude, row.longitude) {
            (Some(latitude), Some(longitude)) => Some(Coordinates {
                latitude,
                longitude,
            }),
            _ => None,
        };

        Measurement {
            location_id: row.location_id,
            location_name: row.location_name,
            coordinates,
            pollutant: row.pollutant,
            value: row.value,
            unit: row.unit,
            observed_at: row.observed_at,
            ingested_at: row.ingested_at,
        }
    }
}

/// Qualitative air-quality category derived from concentration breakpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AirStatus {
    Good,
    Moderate,
    Unhealthy,
    Hazardous,
}

/// Latest reading per location, ranked (1 = most polluted).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationSummary {
    // ---
    pub location_id: String,
    pub location_name: String,
    pub latest_value: f64,
    pub observed_at: DateTime<Utc>,
    pub rank: usize,
    pub status: AirStatus,
}

/// A single reading that exceeded the alert threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    // ---
    pub location_id: String,
    pub location_name: String,
    pub triggered_at: DateTime<Utc>,
    pub value: f64,
    pub threshold_exceeded: f64,
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;

    fn create_test_row(latitude: Option<f64>, longitude: Option<f64>) -> MeasurementRow {
        // ---
        MeasurementRow {
            location_id: "2178".to_string(),
            location_name: "Del Norte".to_string(),
            latitude,
            longitude,
            pollutant: "pm25".to_string(),
            value: 8.5,
            unit: CANONICAL_UNIT.to_string(),
            observed_at: Utc.with_ymd_and_hms(2025, 3, 26, 18, 0, 0).unwrap(),
            ingested_at: Utc.with_ymd_and_hms(2025, 3, 26, 18, 5, 0).unwrap(),
        }
    }

    #[test]
    fn test_row_with_coordinates() {
        // ---
        let m: Measurement = create_test_row(Some(35.13), Some(-106.58)).into();
        assert_eq!(
            m.coordinates,
            Some(Coordinates {
                latitude: 35.13,
                longitude: -106.58
            })
        );
        assert_eq!(m.location_id, "2178");
        assert_eq!(m.value, 8.5);
    }

    #[test]
    fn test_row_with_partial_coordinates_drops_them() {
        // ---
        let m: Measurement = create_test_row(Some(35.13), None).into();
        assert!(m.coordinates.is_none());
    }

    #[test]
    fn test_natural_key_ignores_value_and_ingest_time() {
        // ---
        let a: Measurement = create_test_row(None, None).into();
        let mut b = a.clone();
        b.value = 99.0;
        b.ingested_at = Utc::now();
        assert_eq!(a.natural_key(), b.natural_key());
    }
}
