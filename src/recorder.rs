//! Result recording seam between the capture orchestrator and the host dataset.
//!
//! The orchestrator only ever talks to the [`ResultRecorder`] trait; the host
//! decides what a dataset is. [`FsRecorder`] is the bundled implementation: a
//! staging directory of PNG files plus an append-only NDJSON manifest that
//! doubles as the resume cursor.

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use url::Url;

use crate::constants::CDX_TIMESTAMP_FORMAT;
use crate::selection::{SelectedSnapshot, TargetPeriod};

/// Manifest file name inside the staging directory.
pub const MANIFEST_FILENAME: &str = ".metadata.ndjson";

/// Final outcome of collecting one selected snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureOutcome {
    Success,
    NavigationTimeout,
    NavigationError,
    CaptureError,
    SessionError,
    /// The archive holds no snapshot for the target period.
    NoSnapshot,
}

impl CaptureOutcome {
    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

/// The durable unit handed to the recorder. Never mutated after emission.
#[derive(Debug, Clone)]
pub struct CaptureResult {
    pub selected: SelectedSnapshot,
    pub outcome: CaptureOutcome,
    /// Present iff the outcome is [`CaptureOutcome::Success`].
    pub screenshot: Option<Vec<u8>>,
    pub attempts_made: u32,
    pub error_detail: Option<String>,
}

/// Persistence contract for capture results.
///
/// Records are keyed by (source URL, archived timestamp); unfulfilled target
/// periods by (source URL, target date). Both key spaces back the resume
/// logic, so an implementation must answer membership for everything it has
/// durably recorded.
#[async_trait]
pub trait ResultRecorder: Send + Sync {
    async fn is_recorded(
        &self,
        source_url: &Url,
        archived_timestamp: DateTime<Utc>,
    ) -> Result<bool>;

    async fn is_unfulfilled_recorded(
        &self,
        source_url: &Url,
        target_date: DateTime<Utc>,
    ) -> Result<bool>;

    async fn record(&self, result: &CaptureResult) -> Result<()>;

    async fn record_unfulfilled(&self, source_url: &Url, period: &TargetPeriod) -> Result<()>;
}

/// One manifest line.
#[derive(Debug, Serialize, Deserialize)]
struct ManifestEntry {
    source_url: String,
    outcome: CaptureOutcome,
    target_date: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    archived_timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    archived_url: Option<String>,
    attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Default)]
struct RecorderState {
    captures: HashSet<(String, DateTime<Utc>)>,
    unfulfilled: HashSet<(String, DateTime<Utc>)>,
}

/// Filesystem-backed recorder: screenshots in a staging directory, metadata
/// appended line-by-line to a manifest.
pub struct FsRecorder {
    staging_dir: PathBuf,
    manifest_path: PathBuf,
    state: tokio::sync::Mutex<RecorderState>,
}

impl FsRecorder {
    /// Open (or create) a staging directory and load the manifest's keys so
    /// an interrupted run resumes where it stopped.
    pub async fn open(staging_dir: impl Into<PathBuf>) -> Result<Self> {
        let staging_dir = staging_dir.into();
        tokio::fs::create_dir_all(&staging_dir)
            .await
            .with_context(|| format!("failed to create {}", staging_dir.display()))?;

        let manifest_path = staging_dir.join(MANIFEST_FILENAME);
        let mut state = RecorderState::default();

        if manifest_path.exists() {
            let contents = tokio::fs::read_to_string(&manifest_path)
                .await
                .with_context(|| format!("failed to read {}", manifest_path.display()))?;
            for line in contents.lines().filter(|l| !l.trim().is_empty()) {
                match serde_json::from_str::<ManifestEntry>(line) {
                    Ok(entry) => match entry.archived_timestamp {
                        Some(timestamp) => {
                            state.captures.insert((entry.source_url, timestamp));
                        }
                        None => {
                            state.unfulfilled.insert((entry.source_url, entry.target_date));
                        }
                    },
                    Err(e) => warn!("Skipping unreadable manifest line: {e}"),
                }
            }
            debug!(
                captures = state.captures.len(),
                unfulfilled = state.unfulfilled.len(),
                "Loaded existing manifest"
            );
        }

        Ok(Self {
            staging_dir,
            manifest_path,
            state: tokio::sync::Mutex::new(state),
        })
    }

    /// Directory screenshots are written into.
    #[must_use]
    pub fn staging_dir(&self) -> &std::path::Path {
        &self.staging_dir
    }

    async fn append_entry(&self, entry: &ManifestEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry).context("failed to serialize manifest entry")?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.manifest_path)
            .await
            .with_context(|| format!("failed to open {}", self.manifest_path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .context("failed to append manifest entry")?;
        file.flush().await.context("failed to flush manifest")?;

        Ok(())
    }
}

#[async_trait]
impl ResultRecorder for FsRecorder {
    async fn is_recorded(
        &self,
        source_url: &Url,
        archived_timestamp: DateTime<Utc>,
    ) -> Result<bool> {
        let state = self.state.lock().await;
        Ok(state
            .captures
            .contains(&(source_url.to_string(), archived_timestamp)))
    }

    async fn is_unfulfilled_recorded(
        &self,
        source_url: &Url,
        target_date: DateTime<Utc>,
    ) -> Result<bool> {
        let state = self.state.lock().await;
        Ok(state
            .unfulfilled
            .contains(&(source_url.to_string(), target_date)))
    }

    async fn record(&self, result: &CaptureResult) -> Result<()> {
        let record = &result.selected.record;
        let source_url = record.source_url.to_string();

        let filename = match (&result.screenshot, result.outcome.is_success()) {
            (Some(png_data), true) => {
                let filename = screenshot_filename(&record.source_url, record.archived_timestamp);
                let path = self.staging_dir.join(&filename);
                tokio::fs::write(&path, png_data)
                    .await
                    .with_context(|| format!("failed to write screenshot to {}", path.display()))?;
                Some(filename)
            }
            _ => None,
        };

        self.append_entry(&ManifestEntry {
            source_url: source_url.clone(),
            outcome: result.outcome,
            target_date: result.selected.period.target_date,
            archived_timestamp: Some(record.archived_timestamp),
            archived_url: Some(record.archived_url.clone()),
            attempts: result.attempts_made,
            filename,
            error: result.error_detail.clone(),
        })
        .await?;

        let mut state = self.state.lock().await;
        state.captures.insert((source_url, record.archived_timestamp));

        Ok(())
    }

    async fn record_unfulfilled(&self, source_url: &Url, period: &TargetPeriod) -> Result<()> {
        self.append_entry(&ManifestEntry {
            source_url: source_url.to_string(),
            outcome: CaptureOutcome::NoSnapshot,
            target_date: period.target_date,
            archived_timestamp: None,
            archived_url: None,
            attempts: 0,
            filename: None,
            error: None,
        })
        .await?;

        let mut state = self.state.lock().await;
        state
            .unfulfilled
            .insert((source_url.to_string(), period.target_date));

        Ok(())
    }
}

/// File name for a screenshot of one archived capture.
#[must_use]
pub fn screenshot_filename(source_url: &Url, archived_timestamp: DateTime<Utc>) -> String {
    let stem = format!(
        "{}_{}",
        source_url,
        archived_timestamp.format(CDX_TIMESTAMP_FORMAT)
    );
    format!("{}.png", sanitize_stem(&stem))
}

/// Sanitize a file stem to be filesystem-safe.
fn sanitize_stem(stem: &str) -> String {
    const MAX_STEM_LENGTH: usize = 200;

    let sanitized: String = stem
        .chars()
        .map(|c| match c {
            ' ' => '_',
            '#' | '?' | '&' | '%' | '"' | '\'' | '<' | '>' | '|' | '*' | ':' | '\\' | '/' => '_',
            '(' | ')' | '[' | ']' | '-' | '_' | '.' => c,
            c if c.is_alphanumeric() => c,
            _ => '_',
        })
        .collect();

    // Collapse consecutive underscores and trim them from the edges.
    let collapsed = sanitized
        .split('_')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_");

    if collapsed.len() > MAX_STEM_LENGTH {
        collapsed[..MAX_STEM_LENGTH].to_string()
    } else {
        collapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_stem() {
        assert_eq!(
            sanitize_stem("https://example.com/page?q=1"),
            "https_example.com_page_q_1"
        );
        assert_eq!(sanitize_stem("My Page #1"), "My_Page_1");
        assert_eq!(sanitize_stem("___"), "");
    }

    #[test]
    fn test_sanitize_stem_caps_length() {
        let long = "a".repeat(400);
        assert_eq!(sanitize_stem(&long).len(), 200);
    }

    #[test]
    fn test_screenshot_filename() {
        let url = Url::parse("https://example.com/").expect("valid test url");
        let timestamp = "2020-01-01T12:30:00Z".parse().expect("valid test timestamp");
        assert_eq!(
            screenshot_filename(&url, timestamp),
            "https_example.com_20200101123000.png"
        );
    }

    #[test]
    fn test_manifest_entry_roundtrip() {
        let entry = ManifestEntry {
            source_url: "https://example.com/".to_string(),
            outcome: CaptureOutcome::NavigationTimeout,
            target_date: "2020-01-01T00:00:00Z".parse().expect("valid test timestamp"),
            archived_timestamp: Some("2020-02-01T00:00:00Z".parse().expect("valid test timestamp")),
            archived_url: Some(
                "https://web.archive.org/web/20200201000000/https://example.com/".to_string(),
            ),
            attempts: 3,
            filename: None,
            error: Some("navigation timed out".to_string()),
        };

        let line = serde_json::to_string(&entry).expect("serializable entry");
        assert!(line.contains("\"navigation_timeout\""));
        let parsed: ManifestEntry = serde_json::from_str(&line).expect("parseable entry");
        assert_eq!(parsed.outcome, CaptureOutcome::NavigationTimeout);
        assert_eq!(parsed.attempts, 3);
        assert!(parsed.filename.is_none());
    }
}
