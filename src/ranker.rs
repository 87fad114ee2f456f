//! Read-time projections over stored measurements: per-location rankings,
//! threshold alerts and window statistics.
//!
//! Nothing here is persisted; every call recomputes from its input.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::Serialize;

use crate::models::{AirStatus, Alert, LocationSummary, Measurement};

// ---

/// Upper bounds (inclusive, µg/m³) of the first three status bands.
///
/// Defaults follow the US EPA 24-hour PM2.5 AQI table, folded onto four
/// categories:
///
/// | Range (µg/m³) | EPA category                              | Status    |
/// |---------------|-------------------------------------------|-----------|
/// | 0.0 – 12.0    | Good                                      | Good      |
/// | 12.1 – 35.4   | Moderate                                  | Moderate  |
/// | 35.5 – 150.4  | Unhealthy for Sensitive Groups, Unhealthy | Unhealthy |
/// | > 150.4       | Very Unhealthy, Hazardous                 | Hazardous |
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Breakpoints {
    // ---
    pub good_max: f64,
    pub moderate_max: f64,
    pub unhealthy_max: f64,
}

impl Default for Breakpoints {
    fn default() -> Self {
        Self {
            good_max: 12.0,
            moderate_max: 35.4,
            unhealthy_max: 150.4,
        }
    }
}

impl Breakpoints {
    // ---
    pub fn classify(&self, value: f64) -> AirStatus {
        match value {
            v if v <= self.good_max => AirStatus::Good,
            v if v <= self.moderate_max => AirStatus::Moderate,
            v if v <= self.unhealthy_max => AirStatus::Unhealthy,
            _ => AirStatus::Hazardous,
        }
    }
}

/// Latest reading per location, ranked by descending value.
///
/// Ranks are ordinal and contiguous 1..N, one per location. Equal values do
/// not share a rank: they get distinct consecutive ranks, ordered by
/// `location_id` ascending.
pub fn rank(measurements: &[Measurement], breakpoints: &Breakpoints) -> Vec<LocationSummary> {
    // ---
    let mut latest: HashMap<&str, &Measurement> = HashMap::new();
    for m in measurements {
        latest
            .entry(m.location_id.as_str())
            .and_modify(|current| {
                if newer(m, *current) {
                    *current = m;
                }
            })
            .or_insert(m);
    }

    let mut picked: Vec<&Measurement> = latest.into_values().collect();
    picked.sort_by(|a, b| {
        b.value
            .total_cmp(&a.value)
            .then_with(|| a.location_id.cmp(&b.location_id))
    });

    picked
        .into_iter()
        .enumerate()
        .map(|(i, m)| LocationSummary {
            location_id: m.location_id.clone(),
            location_name: m.location_name.clone(),
            latest_value: m.value,
            observed_at: m.observed_at,
            rank: i + 1,
            status: breakpoints.classify(m.value),
        })
        .collect()
}

/// Whether `a` should replace `b` as a location's latest reading.
fn newer(a: &Measurement, b: &Measurement) -> bool {
    // ---
    match a.observed_at.cmp(&b.observed_at) {
        Ordering::Greater => true,
        Ordering::Less => false,
        // Same instant within one location: keep the result independent of input order.
        Ordering::Equal => (&a.pollutant, a.value.to_bits()) < (&b.pollutant, b.value.to_bits()),
    }
}

/// One alert per measurement strictly above `threshold`, in input order.
pub fn detect_alerts(measurements: &[Measurement], threshold: f64) -> Vec<Alert> {
    // ---
    measurements
        .iter()
        .filter(|m| m.value > threshold)
        .map(|m| Alert {
            location_id: m.location_id.clone(),
            location_name: m.location_name.clone(),
            triggered_at: m.observed_at,
            value: m.value,
            threshold_exceeded: threshold,
        })
        .collect()
}

/// Window-wide summary statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryStats {
    // ---
    pub max: f64,
    pub min: f64,
    pub mean: f64,
    pub count: usize,
}

pub fn summary_stats(measurements: &[Measurement]) -> Option<SummaryStats> {
    // ---
    if measurements.is_empty() {
        return None;
    }
    let (mut max, mut min, mut sum) = (f64::MIN, f64::MAX, 0.0);
    for m in measurements {
        max = max.max(m.value);
        min = min.min(m.value);
        sum += m.value;
    }
    Some(SummaryStats {
        max,
        min,
        mean: sum / measurements.len() as f64,
        count: measurements.len(),
    })
}

/// Mean concentration of one location over the window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationAverage {
    // ---
    pub location_id: String,
    pub location_name: String,
    pub mean_value: f64,
    pub readings: usize,
}

/// Top `n` locations by mean concentration, highest first.
pub fn top_polluted(measurements: &[Measurement], n: usize) -> Vec<LocationAverage> {
    // ---
    let mut sums: HashMap<&str, (&str, f64, usize)> = HashMap::new();
    for m in measurements {
        let entry = sums
            .entry(m.location_id.as_str())
            .or_insert((m.location_name.as_str(), 0.0, 0));
        entry.1 += m.value;
        entry.2 += 1;
    }

    let mut averages: Vec<LocationAverage> = sums
        .into_iter()
        .map(|(id, (name, sum, count))| LocationAverage {
            location_id: id.to_string(),
            location_name: name.to_string(),
            mean_value: sum / count as f64,
            readings: count,
        })
        .collect();
    averages.sort_by(|a, b| {
        b.mean_value
            .total_cmp(&a.mean_value)
            .then_with(|| a.location_id.cmp(&b.location_id))
    });
    averages.truncate(n);
    averages
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::CANONICAL_UNIT;
    use chrono::{Duration, TimeZone, Utc};

    fn create_test_measurement(location_id: &str, value: f64, minutes: i64) -> Measurement {
        // ---
        let base = Utc.with_ymd_and_hms(2025, 3, 26, 12, 0, 0).unwrap();
        Measurement {
            location_id: location_id.to_string(),
            location_name: format!("Station {location_id}"),
            coordinates: None,
            pollutant: "pm25".to_string(),
            value,
            unit: CANONICAL_UNIT.to_string(),
            observed_at: base + Duration::minutes(minutes),
            ingested_at: base + Duration::hours(1),
        }
    }

    #[test]
    fn test_three_locations_rank_and_status() {
        // ---
        let data = vec![
            create_test_measurement("a", 42.0, 0),
            create_test_measurement("b", 15.3, 0),
            create_test_measurement("c", 60.1, 0),
        ];
        let ranked = rank(&data, &Breakpoints::default());

        let got: Vec<(f64, usize, AirStatus)> = ranked
            .iter()
            .map(|s| (s.latest_value, s.rank, s.status))
            .collect();
        assert_eq!(
            got,
            vec![
                (60.1, 1, AirStatus::Unhealthy),
                (42.0, 2, AirStatus::Unhealthy),
                (15.3, 3, AirStatus::Moderate),
            ]
        );
    }

    #[test]
    fn test_rank_uses_latest_reading_per_location() {
        // ---
        let data = vec![
            create_test_measurement("a", 200.0, 0),
            create_test_measurement("a", 5.0, 30),
            create_test_measurement("b", 20.0, 10),
        ];
        let ranked = rank(&data, &Breakpoints::default());

        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].location_id, "b");
        assert_eq!(ranked[1].location_id, "a");
        assert_eq!(ranked[1].latest_value, 5.0);
        assert_eq!(ranked[1].status, AirStatus::Good);
    }

    #[test]
    fn test_rank_is_total_and_contiguous_with_ties() {
        // ---
        let data = vec![
            create_test_measurement("z", 10.0, 0),
            create_test_measurement("m", 10.0, 0),
            create_test_measurement("a", 10.0, 0),
            create_test_measurement("q", 99.0, 0),
        ];
        let ranked = rank(&data, &Breakpoints::default());

        let ids: Vec<&str> = ranked.iter().map(|s| s.location_id.as_str()).collect();
        assert_eq!(ids, vec!["q", "a", "m", "z"]);
        let ranks: Vec<usize> = ranked.iter().map(|s| s.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3, 4]);
        assert!(ranked
            .windows(2)
            .all(|w| w[0].latest_value >= w[1].latest_value));
    }

    #[test]
    fn test_rank_is_independent_of_input_order() {
        // ---
        let mut data = vec![
            create_test_measurement("a", 3.0, 5),
            create_test_measurement("a", 7.0, 5),
            create_test_measurement("b", 1.0, 0),
        ];
        let forward = rank(&data, &Breakpoints::default());
        data.reverse();
        let backward = rank(&data, &Breakpoints::default());
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_rank_empty() {
        // ---
        assert!(rank(&[], &Breakpoints::default()).is_empty());
    }

    #[test]
    fn test_breakpoint_boundaries() {
        // ---
        let bp = Breakpoints::default();
        assert_eq!(bp.classify(0.0), AirStatus::Good);
        assert_eq!(bp.classify(12.0), AirStatus::Good);
        assert_eq!(bp.classify(12.05), AirStatus::Moderate);
        assert_eq!(bp.classify(35.4), AirStatus::Moderate);
        assert_eq!(bp.classify(35.5), AirStatus::Unhealthy);
        assert_eq!(bp.classify(150.4), AirStatus::Unhealthy);
        assert_eq!(bp.classify(150.5), AirStatus::Hazardous);
        assert_eq!(bp.classify(500.0), AirStatus::Hazardous);
    }

    #[test]
    fn test_alerts_strictly_exceed_threshold() {
        // ---
        let data = vec![
            create_test_measurement("a", 100.0, 0),
            create_test_measurement("a", 100.5, 10),
            create_test_measurement("a", 180.0, 20),
            create_test_measurement("b", 12.0, 0),
        ];
        let alerts = detect_alerts(&data, 100.0);

        assert_eq!(alerts.len(), 2);
        assert!(alerts.iter().all(|a| a.value > 100.0));
        assert!(alerts.iter().all(|a| a.threshold_exceeded == 100.0));
        assert!(alerts.iter().all(|a| a.location_id == "a"));
        assert_eq!(alerts[1].triggered_at, data[2].observed_at);
    }

    #[test]
    fn test_summary_stats() {
        // ---
        assert!(summary_stats(&[]).is_none());

        let data = vec![
            create_test_measurement("a", 10.0, 0),
            create_test_measurement("b", 20.0, 0),
            create_test_measurement("c", 60.0, 0),
        ];
        let stats = summary_stats(&data).unwrap();
        assert_eq!(stats.max, 60.0);
        assert_eq!(stats.min, 10.0);
        assert_eq!(stats.mean, 30.0);
        assert_eq!(stats.count, 3);
    }

    #[test]
    fn test_top_polluted_by_mean() {
        // ---
        let data = vec![
            create_test_measurement("a", 10.0, 0),
            create_test_measurement("a", 30.0, 10),
            create_test_measurement("b", 25.0, 0),
            create_test_measurement("c", 5.0, 0),
        ];
        let top = top_polluted(&data, 2);

        assert_eq!(top.len(), 2);
        assert_eq!(top[0].location_id, "b");
        assert_eq!(top[1].location_id, "a");
        assert_eq!(top[1].mean_value, 20.0);
        assert_eq!(top[1].readings, 2);
    }
}
