//! Integration tests for the CDX index client.

use std::sync::Arc;
use std::time::Duration;

use archive_screenshot_collector::archiver::Pacer;
use archive_screenshot_collector::wayback::{CdxClient, LocateError, SnapshotLocator};
use chrono::{DateTime, Utc};
use url::Url;
use wiremock::matchers::{method, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> CdxClient {
    CdxClient::with_base_url(server.uri(), Arc::new(Pacer::new(Duration::ZERO)))
}

fn source_url() -> Url {
    Url::parse("https://example.com/").expect("valid test url")
}

fn utc(s: &str) -> DateTime<Utc> {
    format!("{s}T00:00:00Z").parse().expect("valid test timestamp")
}

#[tokio::test]
async fn test_locate_returns_ordered_records() {
    let server = MockServer::start().await;

    // Rows deliberately out of order; the locator must sort ascending.
    let body = r#"[
        ["urlkey","timestamp","original","mimetype","statuscode","digest","length"],
        ["com,example)/","20161220000000","https://example.com/","text/html","200","DEF","2345"],
        ["com,example)/","20150601000000","https://example.com/","text/html","200","ABC","1234"]
    ]"#;

    Mock::given(method("GET"))
        .and(query_param("url", "example.com/"))
        .and(query_param("output", "json"))
        .and(query_param("filter", "statuscode:200"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let records = client
        .locate(&source_url(), utc("2015-01-01"), utc("2018-01-01"))
        .await
        .expect("locate should succeed");

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].archived_timestamp, utc("2015-06-01"));
    assert_eq!(records[1].archived_timestamp, utc("2016-12-20"));
    assert_eq!(
        records[0].archived_url,
        "https://web.archive.org/web/20150601000000/https://example.com/"
    );
}

#[tokio::test]
async fn test_locate_follows_resume_key_pagination() {
    let server = MockServer::start().await;

    let first_page = r#"[
        ["urlkey","timestamp","original","mimetype","statuscode","digest","length"],
        ["com,example)/","20150601000000","https://example.com/","text/html","200","ABC","1234"],
        [],
        ["com,example)/+20150601000000"]
    ]"#;
    let second_page = r#"[
        ["urlkey","timestamp","original","mimetype","statuscode","digest","length"],
        ["com,example)/","20150601000000","https://example.com/","text/html","200","ABC","1234"],
        ["com,example)/","20161220000000","https://example.com/","text/html","200","DEF","2345"]
    ]"#;

    // Mount the continuation first: wiremock picks the earliest matching mock.
    Mock::given(method("GET"))
        .and(query_param("resumeKey", "com,example)/+20150601000000"))
        .respond_with(ResponseTemplate::new(200).set_body_string(second_page))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(first_page))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let records = client
        .locate(&source_url(), utc("2015-01-01"), utc("2018-01-01"))
        .await
        .expect("locate should succeed");

    // The repeated timestamp across pages is de-duplicated.
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].archived_timestamp, utc("2015-06-01"));
    assert_eq!(records[1].archived_timestamp, utc("2016-12-20"));
}

#[tokio::test]
async fn test_locate_empty_index_is_not_an_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let records = client
        .locate(&source_url(), utc("2015-01-01"), utc("2018-01-01"))
        .await
        .expect("empty index should not error");

    assert!(records.is_empty());
}

#[tokio::test]
async fn test_locate_http_error_is_index_unavailable() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let error = client
        .locate(&source_url(), utc("2015-01-01"), utc("2018-01-01"))
        .await
        .expect_err("503 should surface as an error");

    assert!(matches!(error, LocateError::IndexUnavailable(_)));
}

#[tokio::test]
async fn test_locate_malformed_body_is_malformed_response() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>Bad Gateway</html>"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let error = client
        .locate(&source_url(), utc("2015-01-01"), utc("2018-01-01"))
        .await
        .expect_err("malformed body should surface as an error");

    assert!(matches!(error, LocateError::MalformedResponse(_)));
}
