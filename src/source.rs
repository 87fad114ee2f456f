//! Remote measurement source: one paginated HTTP request per page.
//!
//! `MeasurementSource` is the seam the fetcher drives; `OpenAqClient` is the
//! production implementation against the OpenAQ measurements endpoint.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header::RETRY_AFTER, Client, StatusCode};
use serde_json::Value;
use tracing::debug;

use crate::error::FetchError;

// ---

/// Header carrying the API credential.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Parameters for a single page request.
#[derive(Debug, Clone, PartialEq)]
pub struct PageQuery {
    // ---
    pub pollutant: String,
    /// 1-based page number.
    pub page: u32,
    pub page_size: u32,
    pub date_from: Option<DateTime<Utc>>,
}

/// One decoded page of raw records plus pagination metadata.
#[derive(Debug, Clone, Default)]
pub struct RawPage {
    // ---
    pub records: Vec<Value>,
    /// Total number of matching records reported by the source, if any.
    pub found: Option<u64>,
}

impl RawPage {
    // ---
    /// Whether the source has no data beyond this page.
    pub fn is_last(&self, query: &PageQuery) -> bool {
        // ---
        if self.records.len() < query.page_size as usize {
            return true;
        }
        match self.found {
            Some(found) => u64::from(query.page) * u64::from(query.page_size) >= found,
            None => false,
        }
    }

    /// Decode a page body, requiring a `results` array.
    pub fn from_json(body: Value) -> Result<Self, FetchError> {
        // ---
        let found = body
            .get("meta")
            .and_then(|m| m.get("found"))
            .and_then(parse_found);

        match body {
            Value::Object(mut map) => match map.remove("results") {
                Some(Value::Array(records)) => Ok(RawPage { records, found }),
                Some(_) => Err(FetchError::MalformedBatch(
                    "'results' is not an array".to_string(),
                )),
                None => Err(FetchError::MalformedBatch(
                    "response missing 'results' field".to_string(),
                )),
            },
            _ => Err(FetchError::MalformedBatch(
                "response body is not a JSON object".to_string(),
            )),
        }
    }
}

/// OpenAQ reports `found` as a number, or as a string such as `">1000"`.
fn parse_found(v: &Value) -> Option<u64> {
    // ---
    match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) if !s.starts_with('>') => s.parse().ok(),
        _ => None,
    }
}

/// A source of paginated raw measurement records.
#[async_trait]
pub trait MeasurementSource: Send + Sync {
    async fn fetch_page(&self, query: &PageQuery) -> Result<RawPage, FetchError>;
}

/// HTTP client for the OpenAQ v2 `measurements` endpoint.
pub struct OpenAqClient {
    // ---
    client: Client,
    base_url: String,
    api_key: String,
}

impl OpenAqClient {
    // ---
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, FetchError> {
        // ---
        if api_key.trim().is_empty() {
            return Err(FetchError::MissingCredential);
        }

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl MeasurementSource for OpenAqClient {
    async fn fetch_page(&self, query: &PageQuery) -> Result<RawPage, FetchError> {
        // ---
        let mut params: Vec<(&str, String)> = vec![
            ("parameter", query.pollutant.clone()),
            ("page", query.page.to_string()),
            ("limit", query.page_size.to_string()),
            ("order_by", "datetime".to_string()),
            ("sort", "desc".to_string()),
        ];
        if let Some(date_from) = query.date_from {
            params.push(("date_from", date_from.to_rfc3339()));
        }

        debug!(page = query.page, url = %self.base_url, "Requesting page");

        let response = self
            .client
            .get(&self.base_url)
            .header(API_KEY_HEADER, &self.api_key)
            .query(&params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, retry_after, body));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| FetchError::MalformedBatch(format!("invalid JSON body: {e}")))?;

        RawPage::from_json(body)
    }
}

/// Map a non-success HTTP status onto the fetch error taxonomy.
pub fn classify_status(status: StatusCode, retry_after: Option<u64>, body: String) -> FetchError {
    // ---
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FetchError::Auth {
            status: status.as_u16(),
        },
        StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited { retry_after },
        _ => FetchError::Http {
            status: status.as_u16(),
            body,
        },
    }
}
