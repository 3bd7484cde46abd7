//! Run progress shared with the host.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::recorder::CaptureOutcome;

#[derive(Debug, Default)]
struct ProgressInner {
    total: AtomicUsize,
    processed: AtomicUsize,
    last_failure: Mutex<Option<CaptureOutcome>>,
}

/// Monotonic progress counters for a collection run.
///
/// Cheap to clone; the collector advances the counters while the host polls
/// [`ProgressTracker::snapshot`] for a progress bar.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    inner: Arc<ProgressInner>,
}

/// Point-in-time view of run progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub processed: usize,
    pub total: usize,
    /// Most recent failure kind, for operator visibility.
    pub last_failure: Option<CaptureOutcome>,
}

impl ProgressTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Grow the known total as more URLs get their snapshot lists selected.
    pub fn add_to_total(&self, count: usize) {
        self.inner.total.fetch_add(count, Ordering::Relaxed);
    }

    /// Count one snapshot as processed, whatever its outcome.
    pub fn mark_processed(&self) {
        self.inner.processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Remember the most recent failure kind.
    pub fn note_failure(&self, outcome: CaptureOutcome) {
        if let Ok(mut last) = self.inner.last_failure.lock() {
            *last = Some(outcome);
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> ProgressSnapshot {
        let last_failure = self
            .inner
            .last_failure
            .lock()
            .map(|guard| *guard)
            .unwrap_or(None);

        ProgressSnapshot {
            processed: self.inner.processed.load(Ordering::Relaxed),
            total: self.inner.total.load(Ordering::Relaxed),
            last_failure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_advance_monotonically() {
        let progress = ProgressTracker::new();
        progress.add_to_total(4);
        progress.mark_processed();
        progress.mark_processed();

        let snapshot = progress.snapshot();
        assert_eq!(snapshot.processed, 2);
        assert_eq!(snapshot.total, 4);
        assert_eq!(snapshot.last_failure, None);
    }

    #[test]
    fn test_last_failure_tracks_most_recent() {
        let progress = ProgressTracker::new();
        progress.note_failure(CaptureOutcome::NavigationTimeout);
        progress.note_failure(CaptureOutcome::CaptureError);

        assert_eq!(
            progress.snapshot().last_failure,
            Some(CaptureOutcome::CaptureError)
        );
    }

    #[test]
    fn test_clones_share_state() {
        let progress = ProgressTracker::new();
        let handle = progress.clone();
        progress.add_to_total(1);
        handle.mark_processed();

        let snapshot = progress.snapshot();
        assert_eq!(snapshot.processed, 1);
        assert_eq!(snapshot.total, 1);
    }
}
