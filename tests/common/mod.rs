//! Shared fixtures for integration tests: a scripted measurement source and
//! record builders shaped like OpenAQ v2 results.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use airwatch::{FetchError, MeasurementSource, PageQuery, PipelineSettings, RawPage, RetryPolicy};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

// ---

/// What the source answers for one request.
#[derive(Clone)]
pub enum Reply {
    Page(Vec<Value>),
    RateLimited,
    Unauthorized,
}

/// Per-page scripted replies. The last reply for a page repeats forever;
/// unscripted pages come back empty.
pub struct ScriptedSource {
    script: HashMap<u32, Vec<Reply>>,
    calls: Mutex<HashMap<u32, usize>>,
}

impl ScriptedSource {
    // ---
    pub fn new(script: Vec<(u32, Vec<Reply>)>) -> Self {
        Self {
            script: script.into_iter().collect(),
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// One page per entry, each answered successfully.
    pub fn pages(pages: Vec<Vec<Value>>) -> Self {
        Self::new(
            pages
                .into_iter()
                .enumerate()
                .map(|(i, records)| (i as u32 + 1, vec![Reply::Page(records)]))
                .collect(),
        )
    }

    pub fn calls_for(&self, page: u32) -> usize {
        self.calls.lock().unwrap().get(&page).copied().unwrap_or(0)
    }
}

#[async_trait]
impl MeasurementSource for ScriptedSource {
    async fn fetch_page(&self, query: &PageQuery) -> Result<RawPage, FetchError> {
        // ---
        let n = {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.entry(query.page).or_insert(0);
            *n += 1;
            *n
        };

        let reply = match self.script.get(&query.page) {
            Some(replies) => replies[(n - 1).min(replies.len() - 1)].clone(),
            None => Reply::Page(Vec::new()),
        };

        match reply {
            Reply::Page(records) => Ok(RawPage {
                records,
                found: None,
            }),
            Reply::RateLimited => Err(FetchError::RateLimited { retry_after: None }),
            Reply::Unauthorized => Err(FetchError::Auth { status: 401 }),
        }
    }
}

/// An OpenAQ-style raw record.
pub fn raw_record(location_id: u64, value: Value, at: DateTime<Utc>) -> Value {
    // ---
    json!({
        "locationId": location_id,
        "location": format!("Station {location_id}"),
        "parameter": "pm25",
        "value": value,
        "date": { "utc": at.to_rfc3339(), "local": at.to_rfc3339() },
        "unit": "µg/m³",
        "coordinates": { "latitude": 40.0 + location_id as f64 / 100.0, "longitude": -105.0 },
        "country": "US",
        "city": null,
        "isMobile": false,
        "isAnalysis": false,
        "entity": "government",
        "sensorType": "reference grade"
    })
}

/// Settings with millisecond backoff so retry paths stay fast.
pub fn fast_settings(page_size: u32) -> PipelineSettings {
    // ---
    let fast = RetryPolicy {
        max_attempts: 5,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
    };
    PipelineSettings {
        page_size,
        max_pages: 10,
        fan_out: 4,
        fetch_retry: fast,
        load_retry: fast,
        ..PipelineSettings::default()
    }
}
