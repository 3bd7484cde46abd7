//! Wayback Machine CDX index client.
//!
//! Discovers which snapshots of a URL the archive holds within a time range.
//! The CDX server is a shared, rate-limited service; all outbound requests go
//! through the pacer shared with the browser session manager.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::Client;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::archiver::Pacer;
use crate::constants::{
    ARCHIVAL_USER_AGENT, CDX_API_URL, CDX_PAGE_SIZE, CDX_TIMESTAMP_FORMAT, REPLAY_URL_PREFIX,
};

/// A single archived capture of a URL, as indexed by the Wayback Machine.
///
/// Immutable once returned by the locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRecord {
    /// The URL the archive captured.
    pub source_url: Url,
    /// When the archive captured it.
    pub archived_timestamp: DateTime<Utc>,
    /// The archive's replay URL for this capture.
    pub archived_url: String,
}

/// Failure to consult the archive index.
///
/// An empty result is not an error; these cover the index itself misbehaving.
#[derive(Debug, Error)]
pub enum LocateError {
    #[error("archive index unavailable: {0}")]
    IndexUnavailable(String),
    #[error("archive index returned a malformed response: {0}")]
    MalformedResponse(String),
}

/// Snapshot discovery contract used by the capture orchestrator.
#[async_trait]
pub trait SnapshotLocator: Send + Sync {
    /// List available snapshots of `source_url` between `start` and `end`,
    /// ordered by archived timestamp ascending. Returns an empty list when
    /// the archive simply has no snapshots in the range.
    async fn locate(
        &self,
        source_url: &Url,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SnapshotRecord>, LocateError>;
}

/// Client for the Wayback Machine CDX API.
pub struct CdxClient {
    client: Client,
    base_url: String,
    page_size: usize,
    pacer: Arc<Pacer>,
}

impl CdxClient {
    /// Create a client against the public CDX endpoint.
    #[must_use]
    pub fn new(pacer: Arc<Pacer>) -> Self {
        Self::with_base_url(CDX_API_URL, pacer)
    }

    /// Create a client against a specific index endpoint (used by tests).
    #[must_use]
    pub fn with_base_url(base_url: impl Into<String>, pacer: Arc<Pacer>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent(ARCHIVAL_USER_AGENT)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.into(),
            page_size: CDX_PAGE_SIZE,
            pacer,
        }
    }

    async fn fetch_page(
        &self,
        url_param: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        resume_key: Option<&str>,
    ) -> Result<CdxPage, LocateError> {
        self.pacer.pace().await;

        let from = start.format(CDX_TIMESTAMP_FORMAT).to_string();
        let to = end.format(CDX_TIMESTAMP_FORMAT).to_string();
        let limit = self.page_size.to_string();

        let mut request = self.client.get(&self.base_url).query(&[
            ("url", url_param),
            ("output", "json"),
            ("filter", "statuscode:200"),
            ("from", from.as_str()),
            ("to", to.as_str()),
            ("limit", limit.as_str()),
            ("showResumeKey", "true"),
        ]);
        if let Some(key) = resume_key {
            request = request.query(&[("resumeKey", key)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| LocateError::IndexUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LocateError::IndexUnavailable(format!(
                "CDX server returned HTTP {status}"
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| LocateError::IndexUnavailable(e.to_string()))?;

        parse_cdx_page(&body).map_err(LocateError::MalformedResponse)
    }
}

#[async_trait]
impl SnapshotLocator for CdxClient {
    async fn locate(
        &self,
        source_url: &Url,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SnapshotRecord>, LocateError> {
        let url_param = strip_scheme(source_url.as_str());

        let mut records: Vec<SnapshotRecord> = Vec::new();
        let mut seen: std::collections::HashSet<DateTime<Utc>> = std::collections::HashSet::new();
        let mut resume_key: Option<String> = None;

        loop {
            let page = self
                .fetch_page(url_param, start, end, resume_key.as_deref())
                .await?;

            for row in &page.rows {
                let Some(timestamp) = parse_cdx_timestamp(&row.timestamp) else {
                    debug!(timestamp = %row.timestamp, "Skipping row with unparseable timestamp");
                    continue;
                };
                if !seen.insert(timestamp) {
                    continue;
                }
                records.push(SnapshotRecord {
                    source_url: source_url.clone(),
                    archived_timestamp: timestamp,
                    archived_url: replay_url(&row.timestamp, &row.original),
                });
            }

            match page.resume_key {
                // A repeated key would loop forever; treat it as the end.
                Some(key)
                    if !page.rows.is_empty() && resume_key.as_deref() != Some(key.as_str()) =>
                {
                    resume_key = Some(key);
                }
                _ => break,
            }
        }

        records.sort_by_key(|r| r.archived_timestamp);

        debug!(
            url = %source_url,
            snapshots = records.len(),
            "Located archived snapshots"
        );

        Ok(records)
    }
}

/// One parsed CDX response page.
#[derive(Debug, PartialEq, Eq)]
struct CdxPage {
    rows: Vec<CdxRow>,
    resume_key: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
struct CdxRow {
    timestamp: String,
    original: String,
}

/// Parse a CDX `output=json` body.
///
/// The body is an array of string arrays: a header row, data rows, and with
/// `showResumeKey` an empty separator row followed by a one-element row
/// holding the resume key.
fn parse_cdx_page(body: &str) -> Result<CdxPage, String> {
    let raw: Vec<Vec<String>> =
        serde_json::from_str(body).map_err(|e| format!("invalid CDX JSON: {e}"))?;

    let mut rows = Vec::new();
    let mut resume_key = None;
    let mut in_trailer = false;

    for row in raw.into_iter().skip(1) {
        if row.is_empty() {
            in_trailer = true;
            continue;
        }
        if in_trailer {
            resume_key = row.into_iter().next();
            break;
        }
        if row.len() < 3 {
            return Err(format!("CDX row has {} columns, expected at least 3", row.len()));
        }
        let mut fields = row.into_iter().skip(1);
        let timestamp = fields.next().unwrap_or_default();
        let original = fields.next().unwrap_or_default();
        rows.push(CdxRow {
            timestamp,
            original,
        });
    }

    Ok(CdxPage { rows, resume_key })
}

/// The CDX API rejects URLs carrying a scheme.
fn strip_scheme(url: &str) -> &str {
    url.split_once("://").map_or(url, |(_, rest)| rest)
}

/// Build the archive's replay URL for a capture.
fn replay_url(timestamp_raw: &str, original: &str) -> String {
    format!("{REPLAY_URL_PREFIX}{timestamp_raw}/{original}")
}

/// Parse a 14-digit CDX timestamp into UTC.
fn parse_cdx_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, CDX_TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}
