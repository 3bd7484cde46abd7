//! Capture orchestration: locates, selects, and captures snapshots per URL.
//!
//! Per-snapshot failures never abort the run; each selected snapshot ends in
//! exactly one recorded result, and an interrupted run resumes from the first
//! snapshot without one.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::session::{CaptureBackend, CaptureError};
use crate::progress::ProgressTracker;
use crate::recorder::{CaptureOutcome, CaptureResult, ResultRecorder};
use crate::selection::{select, SelectedSnapshot, SnapshotRequest};
use crate::wayback::SnapshotLocator;

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Capture attempts per snapshot before recording a failure.
    pub max_attempts: u32,
    /// Base delay of the exponential retry backoff.
    pub retry_backoff: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff: Duration::from_secs(2),
        }
    }
}

/// Counters describing a finished (or cancelled) run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub urls_processed: usize,
    /// URLs skipped because the archive index was unavailable.
    pub urls_skipped: usize,
    pub captured: usize,
    pub failed: usize,
    pub unfulfilled: usize,
    /// Snapshots skipped because a previous run already recorded them.
    pub already_recorded: usize,
    pub cancelled: bool,
}

/// Drives the capture pipeline across all requested URLs.
pub struct Collector<L, B, R> {
    locator: L,
    backend: B,
    recorder: R,
    config: CollectorConfig,
    progress: ProgressTracker,
    cancel: CancellationToken,
}

struct RunState<S> {
    session: Option<S>,
    /// Whether any browser session started during this run; if none ever did,
    /// a session failure is resource exhaustion and aborts the job.
    ever_acquired: bool,
}

impl<L, B, R> Collector<L, B, R>
where
    L: SnapshotLocator,
    B: CaptureBackend,
    R: ResultRecorder,
{
    pub fn new(
        locator: L,
        backend: B,
        recorder: R,
        config: CollectorConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            locator,
            backend,
            recorder,
            config,
            progress: ProgressTracker::new(),
            cancel,
        }
    }

    /// Handle the host can poll for progress while the run is underway.
    #[must_use]
    pub fn progress(&self) -> ProgressTracker {
        self.progress.clone()
    }

    /// Run the pipeline over all requests.
    ///
    /// Returns an error only for configuration-level failures surfaced by the
    /// recorder or for browser resource exhaustion; everything else lands in
    /// the summary.
    pub async fn run(&self, requests: &[SnapshotRequest]) -> Result<RunSummary> {
        let mut state = RunState {
            session: None,
            ever_acquired: false,
        };

        let outcome = self.run_inner(requests, &mut state).await;

        // The session is released on every exit path, including errors and
        // cancellation.
        if let Some(live) = state.session.take() {
            self.backend.release(live).await;
        }

        outcome
    }

    async fn run_inner(
        &self,
        requests: &[SnapshotRequest],
        state: &mut RunState<B::Session>,
    ) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        'requests: for request in requests {
            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            let url = &request.source_url;
            info!(url = %url, "Locating archived snapshots");

            let records = match self.locator.locate(url, request.start, request.end).await {
                Ok(records) => records,
                Err(e) => {
                    warn!(url = %url, error = %e, "Archive index unavailable, skipping URL");
                    summary.urls_skipped += 1;
                    continue;
                }
            };

            if records.is_empty() {
                info!(url = %url, "No archived snapshots found in the requested range");
            }

            let selection = select(&records, request);
            self.progress
                .add_to_total(selection.selected.len() + selection.unfulfilled.len());

            for period in &selection.unfulfilled {
                if !self
                    .recorder
                    .is_unfulfilled_recorded(url, period.target_date)
                    .await?
                {
                    self.recorder.record_unfulfilled(url, period).await?;
                }
                summary.unfulfilled += 1;
                self.progress.mark_processed();
            }

            for snapshot in &selection.selected {
                if self.cancel.is_cancelled() {
                    summary.cancelled = true;
                    break 'requests;
                }

                if self
                    .recorder
                    .is_recorded(url, snapshot.record.archived_timestamp)
                    .await?
                {
                    debug!(
                        url = %url,
                        timestamp = %snapshot.record.archived_timestamp,
                        "Snapshot already recorded, skipping"
                    );
                    summary.already_recorded += 1;
                    self.progress.mark_processed();
                    continue;
                }

                let result = self.capture_snapshot(state, snapshot).await?;
                if result.outcome.is_success() {
                    summary.captured += 1;
                } else {
                    summary.failed += 1;
                }

                self.recorder
                    .record(&result)
                    .await
                    .context("failed to record capture result")?;
                self.progress.mark_processed();

                let progress = self.progress.snapshot();
                info!(
                    url = %url,
                    outcome = ?result.outcome,
                    attempts = result.attempts_made,
                    processed = progress.processed,
                    total = progress.total,
                    "Recorded capture result"
                );
            }

            summary.urls_processed += 1;
        }

        Ok(summary)
    }

    /// Take one snapshot to a terminal state, retrying transient failures
    /// with exponential backoff.
    async fn capture_snapshot(
        &self,
        state: &mut RunState<B::Session>,
        snapshot: &SelectedSnapshot,
    ) -> Result<CaptureResult> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempts = 0u32;

        loop {
            attempts += 1;

            let error = match self.attempt_capture(state, snapshot).await {
                Ok(png_data) => {
                    return Ok(CaptureResult {
                        selected: snapshot.clone(),
                        outcome: CaptureOutcome::Success,
                        screenshot: Some(png_data),
                        attempts_made: attempts,
                        error_detail: None,
                    });
                }
                Err(e) => e,
            };

            let outcome = outcome_for(&error);
            self.progress.note_failure(outcome);

            if error.is_retryable() && attempts < max_attempts {
                let delay = backoff_delay(self.config.retry_backoff, attempts);
                debug!(
                    url = %snapshot.record.archived_url,
                    attempt = attempts,
                    delay = ?delay,
                    error = %error,
                    "Capture failed, backing off before retry"
                );
                sleep(delay).await;
                continue;
            }

            if matches!(error, CaptureError::Session(_)) && !state.ever_acquired {
                anyhow::bail!("browser could not be started: {error}");
            }

            warn!(
                url = %snapshot.record.archived_url,
                attempts,
                error = %error,
                "Giving up on snapshot"
            );
            return Ok(CaptureResult {
                selected: snapshot.clone(),
                outcome,
                screenshot: None,
                attempts_made: attempts,
                error_detail: Some(error.to_string()),
            });
        }
    }

    async fn attempt_capture(
        &self,
        state: &mut RunState<B::Session>,
        snapshot: &SelectedSnapshot,
    ) -> Result<Vec<u8>, CaptureError> {
        let mut session = match state.session.take() {
            Some(session) => session,
            None => {
                let fresh = self.backend.acquire().await?;
                state.ever_acquired = true;
                fresh
            }
        };

        let result = self
            .backend
            .capture(&mut session, &snapshot.record.archived_url)
            .await;
        state.session = Some(session);
        result
    }
}

fn outcome_for(error: &CaptureError) -> CaptureOutcome {
    match error {
        CaptureError::NavigationTimeout { .. } => CaptureOutcome::NavigationTimeout,
        CaptureError::Navigation { .. } | CaptureError::InvalidArchivedUrl { .. } => {
            CaptureOutcome::NavigationError
        }
        CaptureError::Capture { .. } => CaptureOutcome::CaptureError,
        CaptureError::Session(_) => CaptureOutcome::SessionError,
    }
}

fn backoff_delay(base: Duration, attempts_made: u32) -> Duration {
    base * 2u32.saturating_pow(attempts_made.saturating_sub(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let base = Duration::from_secs(2);
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(4));
        assert_eq!(backoff_delay(base, 3), Duration::from_secs(8));
    }

    #[test]
    fn test_outcome_mapping() {
        let error = CaptureError::Capture {
            url: "https://web.archive.org/web/20200101000000/https://example.com/".to_string(),
            reason: "empty".to_string(),
        };
        assert_eq!(outcome_for(&error), CaptureOutcome::CaptureError);

        let error = CaptureError::NavigationTimeout {
            url: "https://web.archive.org/web/20200101000000/https://example.com/".to_string(),
            timeout: Duration::from_secs(30),
        };
        assert_eq!(outcome_for(&error), CaptureOutcome::NavigationTimeout);
    }
}
