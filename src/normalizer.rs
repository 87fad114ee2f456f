//! Maps raw source records into the canonical `Measurement` shape.
//!
//! This is the only place that looks at raw JSON. Bad records are rejected and
//! counted; the batch as a whole fails only if an element is not a JSON object
//! at all, meaning the payload is not a list of measurements.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::NormalizeError;
use crate::models::{Coordinates, Measurement, CANONICAL_UNIT};

// ---

/// Output of a normalization pass.
#[derive(Debug, Default)]
pub struct Normalized {
    // ---
    pub measurements: Vec<Measurement>,
    /// Records dropped for missing, negative, non-numeric or otherwise invalid fields.
    pub rejected: usize,
    /// Records dropped because they report a different pollutant.
    pub skipped: usize,
}

#[derive(Debug, PartialEq)]
enum Rejection {
    OtherPollutant,
    Invalid(&'static str),
}

pub struct Normalizer {
    // ---
    pollutant: String,
}

impl Normalizer {
    // ---
    pub fn new(pollutant: &str) -> Self {
        Self {
            pollutant: canonical_pollutant(pollutant),
        }
    }

    pub fn pollutant(&self) -> &str {
        &self.pollutant
    }

    pub fn normalize(&self, records: &[Value]) -> Result<Normalized, NormalizeError> {
        // ---
        if let Some(index) = records.iter().position(|r| !r.is_object()) {
            return Err(NormalizeError::MalformedBatch { index });
        }

        let ingested_at = Utc::now();
        let mut out = Normalized::default();

        for (i, record) in records.iter().enumerate() {
            match self.normalize_record(record, ingested_at) {
                Ok(m) => out.measurements.push(m),
                Err(Rejection::OtherPollutant) => out.skipped += 1,
                Err(Rejection::Invalid(reason)) => {
                    debug!(index = i, reason, record = %record, "Rejected record");
                    out.rejected += 1;
                }
            }
        }

        info!(
            clean = out.measurements.len(),
            rejected = out.rejected,
            skipped = out.skipped,
            "Normalized batch"
        );
        Ok(out)
    }

    fn normalize_record(
        &self,
        record: &Value,
        ingested_at: DateTime<Utc>,
    ) -> Result<Measurement, Rejection> {
        // ---
        let parameter = record
            .get("parameter")
            .and_then(Value::as_str)
            .ok_or(Rejection::Invalid("missing parameter"))?;
        if canonical_pollutant(parameter) != self.pollutant {
            return Err(Rejection::OtherPollutant);
        }

        let raw_value = parse_value(record.get("value"))?;
        let (value, unit) = convert_unit(raw_value, record.get("unit").and_then(Value::as_str))?;

        let observed_at = parse_observed_at(record).ok_or(Rejection::Invalid("unparsable timestamp"))?;

        let location_name = record
            .get("location")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let location_id = match record.get("locationId") {
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => location_name.map(str::to_string),
        }
        .ok_or(Rejection::Invalid("missing location"))?;
        let location_name = location_name
            .map(str::to_string)
            .unwrap_or_else(|| location_id.clone());

        Ok(Measurement {
            location_id,
            location_name,
            coordinates: parse_coordinates(record.get("coordinates")),
            pollutant: self.pollutant.clone(),
            value,
            unit: unit.to_string(),
            observed_at,
            ingested_at,
        })
    }
}

/// Lower-cased parameter name with separators removed (`PM2.5` → `pm25`).
pub fn canonical_pollutant(name: &str) -> String {
    name.trim()
        .chars()
        .filter(|c| !matches!(*c, '.' | '_' | ' ' | '-'))
        .flat_map(char::to_lowercase)
        .collect()
}

fn parse_value(v: Option<&Value>) -> Result<f64, Rejection> {
    // ---
    let value = match v {
        None | Some(Value::Null) => return Err(Rejection::Invalid("missing value")),
        Some(Value::Number(n)) => n.as_f64().ok_or(Rejection::Invalid("non-numeric value"))?,
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| Rejection::Invalid("non-numeric value"))?,
        Some(_) => return Err(Rejection::Invalid("non-numeric value")),
    };

    if !value.is_finite() {
        return Err(Rejection::Invalid("non-finite value"));
    }
    if value < 0.0 {
        return Err(Rejection::Invalid("negative value"));
    }
    Ok(value)
}

/// Bring a concentration into the canonical unit.
fn convert_unit(value: f64, unit: Option<&str>) -> Result<(f64, &'static str), Rejection> {
    // ---
    let Some(unit) = unit else {
        return Ok((value, CANONICAL_UNIT));
    };
    let compact: String = unit
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect();

    match compact.as_str() {
        "µg/m³" | "μg/m³" | "ug/m3" | "µg/m3" | "μg/m3" | "ug/m³" => Ok((value, CANONICAL_UNIT)),
        "mg/m³" | "mg/m3" => Ok((value * 1000.0, CANONICAL_UNIT)),
        _ => Err(Rejection::Invalid("unsupported unit")),
    }
}

fn parse_observed_at(record: &Value) -> Option<DateTime<Utc>> {
    // ---
    match record.get("date")? {
        Value::String(s) => parse_timestamp(s),
        Value::Object(date) => date
            .get("utc")
            .and_then(Value::as_str)
            .and_then(parse_timestamp)
            .or_else(|| {
                date.get("local")
                    .and_then(Value::as_str)
                    .and_then(parse_timestamp)
            }),
        _ => None,
    }
}

/// RFC 3339 with any offset, or a naive timestamp taken as UTC.
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    // ---
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Coordinates pass through; out-of-range pairs are dropped to `None`.
fn parse_coordinates(v: Option<&Value>) -> Option<Coordinates> {
    // ---
    let obj = v?.as_object()?;
    let latitude = obj.get("latitude")?.as_f64()?;
    let longitude = obj.get("longitude")?.as_f64()?;
    if latitude.abs() > 90.0 || longitude.abs() > 180.0 {
        return None;
    }
    Some(Coordinates {
        latitude,
        longitude,
    })
}
