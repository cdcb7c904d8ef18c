//! Integration test for the feed client against a mock HTTP server, in the
//! teacher's `#[tokio::test]` + request-library style.

use httpmock::MockServer;
use mls_replicator::feed::FeedClient;
use mls_replicator::models::Resource;
use mls_replicator::rate_limiter::RateLimiter;
use std::sync::Arc;
use uuid::Uuid;

#[tokio::test]
async fn fetch_page_parses_value_and_next_link() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(httpmock::Method::GET).path("/Property");
        then.status(200).json_body(serde_json::json!({
            "value": [{"ListingKey": "K1", "ModificationTimestamp": "2026-01-01T00:00:00Z"}],
            "@odata.nextLink": format!("{}/Property?page=2", server.base_url()),
        }));
    });

    let limiter = Arc::new(RateLimiter::new(1 << 30, 1 << 31));
    let client = FeedClient::new(server.base_url(), "test-token", limiter).unwrap();
    let url = format!("{}/Property", server.base_url());

    let (result, row) = client.fetch_page(&url, Uuid::new_v4()).await;
    let page = result.expect("page should parse");

    mock.assert();
    assert_eq!(page.records.len(), 1);
    assert!(page.next_link.is_some());
    assert_eq!(row.record_count, Some(1));
    assert_eq!(row.status, Some(200));
}

#[tokio::test]
async fn non_2xx_surfaces_api_error() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(httpmock::Method::GET).path("/Property");
        then.status(500).body("internal error");
    });

    let limiter = Arc::new(RateLimiter::new(1 << 30, 1 << 31));
    let client = FeedClient::new(server.base_url(), "test-token", limiter).unwrap();
    let url = format!("{}/Property", server.base_url());

    let (result, row) = client.fetch_page(&url, Uuid::new_v4()).await;
    assert!(result.is_err());
    assert_eq!(row.status, Some(500));
}

#[tokio::test]
async fn build_initial_url_targets_resource_path() {
    let limiter = Arc::new(RateLimiter::new(1 << 30, 1 << 31));
    let client = FeedClient::new("https://feed.example.test/odata".to_string(), "tok", limiter).unwrap();
    let url = client.build_initial_url(Resource::Listing, "VENDOR_MLS");
    assert!(url.starts_with("https://feed.example.test/odata/Property"));
}
