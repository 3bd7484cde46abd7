//! Request pacing for the archive's shared external services.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

/// Minimum-interval pacer shared by everything that talks to the archive.
///
/// A single mutex-guarded timestamp of the last outbound request: the index
/// client and the browser session manager both draw from it, so the total
/// request rate to the remote host stays bounded no matter how many lanes
/// share the pacer.
#[derive(Debug)]
pub struct Pacer {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl Pacer {
    /// Create a pacer enforcing `min_interval` between consecutive requests.
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Mutex::new(None),
        }
    }

    /// Wait until at least the configured interval has passed since the
    /// previous paced request, then claim the current slot.
    ///
    /// The guard is held across the sleep so concurrent callers queue up
    /// rather than stampede when the interval elapses.
    pub async fn pace(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_pace_enforces_minimum_interval() {
        let pacer = Pacer::new(Duration::from_millis(500));

        let started = Instant::now();
        pacer.pace().await;
        pacer.pace().await;

        assert!(started.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_request_is_not_delayed() {
        let pacer = Pacer::new(Duration::from_secs(60));

        let started = Instant::now();
        pacer.pace().await;

        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spaced_requests_do_not_wait() {
        let pacer = Pacer::new(Duration::from_millis(100));

        pacer.pace().await;
        sleep(Duration::from_millis(200)).await;

        let before = Instant::now();
        pacer.pace().await;
        assert_eq!(before.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_across_tasks() {
        use std::sync::Arc;

        let pacer = Arc::new(Pacer::new(Duration::from_millis(250)));
        let started = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..3 {
            let pacer = Arc::clone(&pacer);
            handles.push(tokio::spawn(async move { pacer.pace().await }));
        }
        for handle in handles {
            handle.await.expect("pacing task panicked");
        }

        // Three paced requests from separate tasks span two full intervals.
        assert!(started.elapsed() >= Duration::from_millis(500));
    }
}
