//! Live checks against a running `airwatch` service.
//!
//! These need the service, its database and a valid API key, so they are
//! ignored by default. Run with `BASE_URL=http://host:8080` and `--ignored`.

use anyhow::Result;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct LocationSummary {
    location_id: String,
    latest_value: f64,
    rank: usize,
    status: String,
}

#[derive(Debug, Deserialize)]
struct Alert {
    location_id: String,
    triggered_at: DateTime<Utc>,
    value: f64,
    threshold_exceeded: f64,
}

fn base_url() -> String {
    std::env::var("BASE_URL").unwrap_or_else(|_| "http://localhost:8080".into())
}

#[tokio::test]
#[ignore = "requires a running airwatch service"]
async fn rankings_are_ordered_and_classified() -> Result<()> {
    // ---
    let url = format!("{}/rankings?limit=50", base_url());
    let rankings: Vec<LocationSummary> = Client::new().get(&url).send().await?.json().await?;

    for (i, s) in rankings.iter().enumerate() {
        // ---
        assert!(!s.location_id.is_empty(), "location_id should not be empty");
        assert_eq!(s.rank, i + 1, "ranks must be contiguous from 1");
        assert!(s.latest_value >= 0.0, "negative value leaked through");

        let expected = match s.latest_value {
            v if v <= 12.0 => "Good",
            v if v <= 35.4 => "Moderate",
            v if v <= 150.4 => "Unhealthy",
            _ => "Hazardous",
        };
        assert_eq!(
            s.status, expected,
            "status for {} should be {}, got {}",
            s.latest_value, expected, s.status
        );
    }

    assert!(
        rankings
            .windows(2)
            .all(|w| w[0].latest_value >= w[1].latest_value),
        "rankings must be ordered by descending value"
    );
    Ok(())
}

#[tokio::test]
#[ignore = "requires a running airwatch service"]
async fn alerts_exceed_threshold() -> Result<()> {
    // ---
    let url = format!("{}/alerts?threshold=35.4&limit=100", base_url());
    let alerts: Vec<Alert> = Client::new().get(&url).send().await?.json().await?;

    for a in &alerts {
        assert!(!a.location_id.is_empty());
        assert!(a.triggered_at <= Utc::now());
        assert_eq!(a.threshold_exceeded, 35.4);
        assert!(
            a.value > a.threshold_exceeded,
            "alert value {} does not exceed {}",
            a.value,
            a.threshold_exceeded
        );
    }
    Ok(())
}
