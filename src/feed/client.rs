//! Feed client (§4.B): fetch protocol, paging, media download.
//!
//! Grounded on the teacher's `DomeRestClient` (bearer `default_headers`,
//! typed response extraction) and `HashdiveScraper::execute_with_retry`'s
//! 429 probe-and-retry loop, generalized to the feed's own 10-minute probe.

use crate::error::{EngineError, Result};
use crate::models::{RequestLogRow, Resource};
use crate::rate_limiter::RateLimiter;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

const RATE_LIMIT_PROBE_INTERVAL: Duration = Duration::from_secs(10 * 60);
const RATE_LIMIT_MAX_PROBES: u32 = 10;

pub struct Page {
    pub records: Vec<serde_json::Value>,
    pub next_link: Option<String>,
    pub bytes: u64,
    pub elapsed_ms: u64,
}

pub struct MediaBytes {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub size: u64,
}

#[derive(Clone)]
pub struct FeedClient {
    client: Client,
    base_url: String,
    limiter: Arc<RateLimiter>,
}

impl FeedClient {
    pub fn new(base_url: String, token: &str, limiter: Arc<RateLimiter>) -> anyhow::Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::AUTHORIZATION,
            format!("Bearer {token}").parse()?,
        );
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .gzip(true)
            .default_headers(headers)
            .build()?;
        Ok(Self { client, base_url, limiter })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn build_initial_url(&self, resource: Resource, vendor: &str) -> String {
        super::url::build_initial_url(&self.base_url, resource, vendor)
    }

    pub fn build_replication_url(&self, resource: Resource, vendor: &str, hwm: DateTime<Utc>, resume_safe: bool) -> String {
        super::url::build_replication_url(&self.base_url, resource, vendor, hwm, resume_safe)
    }

    pub fn build_single_listing_url(&self, vendor: &str, listing_id: &str) -> String {
        super::url::build_single_listing_url(&self.base_url, vendor, listing_id)
    }

    /// One page fetch, including the rate-limit probe loop and request log row.
    pub async fn fetch_page(&self, url: &str, run_id: Uuid) -> (Result<Page>, RequestLogRow) {
        for probe in 0..RATE_LIMIT_MAX_PROBES {
            self.limiter.admit_api().await;
            let start = Instant::now();
            let sent = self.client.get(url).send().await;
            let elapsed_ms = start.elapsed().as_millis() as u64;

            match sent {
                Ok(resp) => {
                    let status = resp.status();
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        warn!(probe, url, "feed 429, waiting 10 minutes before re-probing");
                        let row = RequestLogRow {
                            run_id,
                            url: url.to_string(),
                            status: Some(status.as_u16()),
                            elapsed_ms,
                            bytes: 0,
                            record_count: None,
                            error_message: Some("rate limited".to_string()),
                            recorded_at: Utc::now(),
                        };
                        if probe + 1 == RATE_LIMIT_MAX_PROBES {
                            return (Err(EngineError::RateLimited), row);
                        }
                        tokio::time::sleep(RATE_LIMIT_PROBE_INTERVAL).await;
                        continue;
                    }

                    if !status.is_success() {
                        let body = resp.text().await.unwrap_or_default();
                        let row = RequestLogRow {
                            run_id,
                            url: url.to_string(),
                            status: Some(status.as_u16()),
                            elapsed_ms,
                            bytes: 0,
                            record_count: None,
                            error_message: Some(body.clone()),
                            recorded_at: Utc::now(),
                        };
                        return (
                            Err(EngineError::ApiError { status: status.as_u16(), body }),
                            row,
                        );
                    }

                    let text = match resp.text().await {
                        Ok(t) => t,
                        Err(e) => {
                            let row = RequestLogRow {
                                run_id,
                                url: url.to_string(),
                                status: Some(status.as_u16()),
                                elapsed_ms,
                                bytes: 0,
                                record_count: None,
                                error_message: Some(e.to_string()),
                                recorded_at: Utc::now(),
                            };
                            return (Err(EngineError::Other(e.into())), row);
                        }
                    };
                    let bytes = text.len() as u64;
                    let parsed: serde_json::Value = match serde_json::from_str(&text) {
                        Ok(v) => v,
                        Err(e) => {
                            let row = RequestLogRow {
                                run_id,
                                url: url.to_string(),
                                status: Some(status.as_u16()),
                                elapsed_ms,
                                bytes,
                                record_count: None,
                                error_message: Some(e.to_string()),
                                recorded_at: Utc::now(),
                            };
                            return (Err(EngineError::Other(e.into())), row);
                        }
                    };

                    let records = parsed
                        .get("value")
                        .and_then(|v| v.as_array())
                        .cloned()
                        .unwrap_or_default();
                    let next_link = parsed
                        .get("@odata.nextLink")
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string());

                    info!(url, records = records.len(), elapsed_ms, "fetched feed page");
                    let row = RequestLogRow {
                        run_id,
                        url: url.to_string(),
                        status: Some(status.as_u16()),
                        elapsed_ms,
                        bytes,
                        record_count: Some(records.len() as u64),
                        error_message: None,
                        recorded_at: Utc::now(),
                    };
                    return (
                        Ok(Page { records: records.clone(), next_link, bytes, elapsed_ms }),
                        row,
                    );
                }
                Err(e) => {
                    let row = RequestLogRow {
                        run_id,
                        url: url.to_string(),
                        status: None,
                        elapsed_ms,
                        bytes: 0,
                        record_count: None,
                        error_message: Some(e.to_string()),
                        recorded_at: Utc::now(),
                    };
                    return (Err(EngineError::Other(e.into())), row);
                }
            }
        }
        unreachable!("probe loop always returns")
    }

    /// Download a signed media URL (§4.B "Media download").
    pub async fn download_media(&self, url: &str, run_id: Uuid) -> (Result<MediaBytes>, RequestLogRow) {
        self.limiter.admit_media().await;
        let start = Instant::now();
        let sent = self.client.get(url).send().await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match sent {
            Ok(resp) => {
                let status = resp.status();
                if status == StatusCode::TOO_MANY_REQUESTS {
                    let row = RequestLogRow {
                        run_id,
                        url: url.to_string(),
                        status: Some(status.as_u16()),
                        elapsed_ms,
                        bytes: 0,
                        record_count: None,
                        error_message: Some("rate limited".to_string()),
                        recorded_at: Utc::now(),
                    };
                    return (Err(EngineError::RateLimited), row);
                }
                if status == StatusCode::BAD_REQUEST || status == StatusCode::FORBIDDEN {
                    let row = RequestLogRow {
                        run_id,
                        url: url.to_string(),
                        status: Some(status.as_u16()),
                        elapsed_ms,
                        bytes: 0,
                        record_count: None,
                        error_message: Some("media url expired".to_string()),
                        recorded_at: Utc::now(),
                    };
                    return (Err(EngineError::UrlExpired { status: status.as_u16() }), row);
                }
                if !status.is_success() {
                    let body = resp.text().await.unwrap_or_default();
                    let row = RequestLogRow {
                        run_id,
                        url: url.to_string(),
                        status: Some(status.as_u16()),
                        elapsed_ms,
                        bytes: 0,
                        record_count: None,
                        error_message: Some(body.clone()),
                        recorded_at: Utc::now(),
                    };
                    return (Err(EngineError::ApiError { status: status.as_u16(), body }), row);
                }

                let content_type = resp
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = match resp.bytes().await {
                    Ok(b) => b,
                    Err(e) => {
                        let row = RequestLogRow {
                            run_id,
                            url: url.to_string(),
                            status: Some(status.as_u16()),
                            elapsed_ms,
                            bytes: 0,
                            record_count: None,
                            error_message: Some(e.to_string()),
                            recorded_at: Utc::now(),
                        };
                        return (Err(EngineError::Other(e.into())), row);
                    }
                };
                let size = bytes.len() as u64;
                self.limiter.record_media_bytes(size);
                let row = RequestLogRow {
                    run_id,
                    url: url.to_string(),
                    status: Some(status.as_u16()),
                    elapsed_ms,
                    bytes: size,
                    record_count: None,
                    error_message: None,
                    recorded_at: Utc::now(),
                };
                (
                    Ok(MediaBytes { bytes: bytes.to_vec(), content_type, size }),
                    row,
                )
            }
            Err(e) => {
                let row = RequestLogRow {
                    run_id,
                    url: url.to_string(),
                    status: None,
                    elapsed_ms,
                    bytes: 0,
                    record_count: None,
                    error_message: Some(e.to_string()),
                    recorded_at: Utc::now(),
                };
                (Err(EngineError::Other(e.into())), row)
            }
        }
    }
}

/// Extracts the `expires=<unix-seconds>` query parameter from a signed CDN URL.
/// Returns `None` if the URL carries no such parameter (treated as non-expiring
/// by callers, which then fall back to other freshness signals).
pub fn url_expires_at(url: &str) -> Option<DateTime<Utc>> {
    let (_, query) = url.split_once('?')?;
    for pair in query.split('&') {
        let (k, v) = pair.split_once('=')?;
        if k == "expires" {
            let secs: i64 = v.parse().ok()?;
            return DateTime::from_timestamp(secs, 0);
        }
    }
    None
}

/// True if the URL's `expires=` timestamp is at or before `now + margin`.
pub fn is_expired(url: &str, now: DateTime<Utc>, margin: Duration) -> bool {
    match url_expires_at(url) {
        Some(exp) => exp <= now + chrono::Duration::from_std(margin).unwrap_or_default(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_expires_param() {
        let url = "https://cdn.example.test/m1.jpg?expires=1700000000&sig=abc";
        assert_eq!(url_expires_at(url), DateTime::from_timestamp(1_700_000_000, 0));
    }

    #[test]
    fn no_expires_param_is_not_expired() {
        let url = "https://cdn.example.test/m1.jpg?sig=abc";
        assert!(!is_expired(url, Utc::now(), Duration::from_secs(60)));
    }

    #[test]
    fn expired_within_margin() {
        let now = Utc::now();
        let exp_ts = now.timestamp() + 30;
        let url = format!("https://cdn.example.test/m1.jpg?expires={exp_ts}");
        assert!(is_expired(&url, now, Duration::from_secs(60)));
    }
}
