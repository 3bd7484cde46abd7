//! Browser session management for screenshot capture.
//!
//! Hides headless-browser instability behind a small acquire/capture/release
//! contract. The orchestrator never touches the automation handle directly,
//! so the automation technology can be swapped without touching it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::{Page, ScreenshotParams};
use futures_util::StreamExt;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use url::Url;

use super::pacing::Pacer;
use crate::constants::WAYBACK_ERROR_TEXTS;

/// Default viewport width in pixels.
pub const DEFAULT_VIEWPORT_WIDTH: u32 = 1280;

/// Default viewport height in pixels.
pub const DEFAULT_VIEWPORT_HEIGHT: u32 = 800;

/// Default page load timeout in seconds.
pub const DEFAULT_PAGE_TIMEOUT_SECS: u64 = 30;

/// Default settle time between page load and screenshot, in seconds.
///
/// The Wayback Machine replay layer is slow to finish rendering; screenshots
/// taken straight after the load event routinely miss images.
pub const DEFAULT_RENDER_DELAY_SECS: u64 = 6;

/// Browser session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Path to the Chrome/Chromium executable (None for auto-detection).
    pub browser_path: Option<PathBuf>,
    /// Viewport width in pixels.
    pub viewport_width: u32,
    /// Viewport height in pixels.
    pub viewport_height: u32,
    /// Per-navigation timeout.
    pub navigation_timeout: Duration,
    /// Settle time between page load and screenshot.
    pub render_delay: Duration,
    /// Browser launch attempts before giving up.
    pub launch_attempts: u32,
    /// Consecutive capture failures before the browser is restarted.
    pub failure_threshold: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            browser_path: None,
            viewport_width: DEFAULT_VIEWPORT_WIDTH,
            viewport_height: DEFAULT_VIEWPORT_HEIGHT,
            navigation_timeout: Duration::from_secs(DEFAULT_PAGE_TIMEOUT_SECS),
            render_delay: Duration::from_secs(DEFAULT_RENDER_DELAY_SECS),
            launch_attempts: 3,
            failure_threshold: 3,
        }
    }
}

/// Failure to start the browser.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to start browser after {attempts} attempts: {reason}")]
    Start { attempts: u32, reason: String },
}

/// Failure of a single capture attempt.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("invalid archived url {url}: {reason}")]
    InvalidArchivedUrl { url: String, reason: String },
    #[error("navigation to {url} timed out after {timeout:?}")]
    NavigationTimeout { url: String, timeout: Duration },
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },
    #[error("screenshot capture failed for {url}: {reason}")]
    Capture { url: String, reason: String },
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl CaptureError {
    /// Whether another attempt on the same snapshot can succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::InvalidArchivedUrl { .. })
    }
}

/// One live automated-browser instance.
///
/// Owned exclusively by the session manager; never shared across concurrent
/// captures.
pub struct BrowserSession {
    browser: Browser,
    handler_task: JoinHandle<()>,
    consecutive_failures: u32,
}

/// Scoped-resource contract the orchestrator drives captures through.
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    type Session: Send;

    /// Launch a browser session, retrying a bounded number of times.
    async fn acquire(&self) -> Result<Self::Session, SessionError>;

    /// Navigate to an archived URL and capture a full-page screenshot.
    async fn capture(
        &self,
        session: &mut Self::Session,
        archived_url: &str,
    ) -> Result<Vec<u8>, CaptureError>;

    /// Tear the session down. Must be called on every exit path so no
    /// browser process leaks across captures.
    async fn release(&self, session: Self::Session);
}

/// Manages the lifecycle of headless-browser sessions.
pub struct SessionManager {
    config: SessionConfig,
    pacer: Arc<Pacer>,
}

impl SessionManager {
    #[must_use]
    pub fn new(config: SessionConfig, pacer: Arc<Pacer>) -> Self {
        Self { config, pacer }
    }

    async fn launch(&self) -> Result<(Browser, JoinHandle<()>), String> {
        let mut config_builder = BrowserConfig::builder()
            .window_size(self.config.viewport_width, self.config.viewport_height)
            .request_timeout(self.config.navigation_timeout)
            .no_sandbox()
            .disable_default_args()
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-software-rasterizer")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-background-networking")
            .arg("--disable-extensions")
            .arg("--disable-sync")
            .arg("--disable-translate")
            .arg("--mute-audio")
            .arg("--hide-scrollbars");

        if let Some(ref browser_path) = self.config.browser_path {
            config_builder = config_builder.chrome_executable(browser_path);
        }

        let browser_config = config_builder
            .build()
            .map_err(|e| format!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| format!("failed to launch browser: {e}"))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler error: {e}");
                }
            }
        });

        Ok((browser, handler_task))
    }

    /// Restart the underlying browser process of a wedged session.
    ///
    /// The replacement is acquired before the old process is torn down, so a
    /// failed restart leaves the session untouched for the next attempt.
    async fn restart(&self, session: &mut BrowserSession) -> Result<(), SessionError> {
        let fresh = self.acquire().await?;
        let old = std::mem::replace(session, fresh);
        shutdown(old).await;
        Ok(())
    }

    async fn navigate_and_capture(
        &self,
        browser: &Browser,
        archived_url: &str,
    ) -> Result<Vec<u8>, CaptureError> {
        let page = match timeout(self.config.navigation_timeout, browser.new_page(archived_url))
            .await
        {
            Err(_) => {
                return Err(CaptureError::NavigationTimeout {
                    url: archived_url.to_string(),
                    timeout: self.config.navigation_timeout,
                })
            }
            Ok(Err(e)) => {
                return Err(CaptureError::Navigation {
                    url: archived_url.to_string(),
                    reason: e.to_string(),
                })
            }
            Ok(Ok(page)) => page,
        };

        let result = self.render_and_screenshot(&page, archived_url).await;

        if let Err(e) = page.close().await {
            warn!("Failed to close page: {e}");
        }

        result
    }

    async fn render_and_screenshot(
        &self,
        page: &Page,
        archived_url: &str,
    ) -> Result<Vec<u8>, CaptureError> {
        match timeout(self.config.navigation_timeout, page.wait_for_navigation()).await {
            Err(_) => {
                return Err(CaptureError::NavigationTimeout {
                    url: archived_url.to_string(),
                    timeout: self.config.navigation_timeout,
                })
            }
            Ok(Err(e)) => {
                return Err(CaptureError::Navigation {
                    url: archived_url.to_string(),
                    reason: e.to_string(),
                })
            }
            Ok(Ok(_)) => {}
        }

        // Scroll to the bottom to trigger lazy-loaded content, then give the
        // replay time to settle before capturing.
        let _ = page
            .evaluate("window.scrollTo(0, document.body.scrollHeight)")
            .await;
        sleep(self.config.render_delay).await;

        if let Ok(content) = page.content().await {
            if is_wayback_error_page(&content) {
                return Err(CaptureError::Navigation {
                    url: archived_url.to_string(),
                    reason: "archive replay served an internal error page".to_string(),
                });
            }
        }

        let _ = page.evaluate("window.scrollTo(0, 0)").await;

        let screenshot_params = ScreenshotParams::builder().full_page(true).build();
        let png_data = page
            .screenshot(screenshot_params)
            .await
            .map_err(|e| CaptureError::Capture {
                url: archived_url.to_string(),
                reason: e.to_string(),
            })?;

        if png_data.is_empty() {
            return Err(CaptureError::Capture {
                url: archived_url.to_string(),
                reason: "browser returned an empty screenshot".to_string(),
            });
        }

        Ok(png_data)
    }
}

#[async_trait]
impl CaptureBackend for SessionManager {
    type Session = BrowserSession;

    async fn acquire(&self) -> Result<BrowserSession, SessionError> {
        let attempts = self.config.launch_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.launch().await {
                Ok((browser, handler_task)) => {
                    info!(attempt, "Headless browser started");
                    return Ok(BrowserSession {
                        browser,
                        handler_task,
                        consecutive_failures: 0,
                    });
                }
                Err(reason) => {
                    warn!(attempt, error = %reason, "Browser launch failed");
                    last_error = reason;
                    if attempt < attempts {
                        sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }

        Err(SessionError::Start {
            attempts,
            reason: last_error,
        })
    }

    async fn capture(
        &self,
        session: &mut BrowserSession,
        archived_url: &str,
    ) -> Result<Vec<u8>, CaptureError> {
        if let Err(e) = Url::parse(archived_url) {
            return Err(CaptureError::InvalidArchivedUrl {
                url: archived_url.to_string(),
                reason: e.to_string(),
            });
        }

        // Browser processes are known to wedge after repeated navigation
        // failures; replace the process before it poisons further captures.
        if session.consecutive_failures >= self.config.failure_threshold {
            warn!(
                failures = session.consecutive_failures,
                "Restarting browser after repeated capture failures"
            );
            self.restart(session).await?;
        }

        self.pacer.pace().await;

        debug!(url = %archived_url, "Capturing screenshot");

        let result = self.navigate_and_capture(&session.browser, archived_url).await;
        match &result {
            Ok(png_data) => {
                session.consecutive_failures = 0;
                debug!(url = %archived_url, size = png_data.len(), "Screenshot captured");
            }
            Err(e) => {
                session.consecutive_failures += 1;
                debug!(
                    url = %archived_url,
                    failures = session.consecutive_failures,
                    error = %e,
                    "Capture attempt failed"
                );
            }
        }

        result
    }

    async fn release(&self, session: BrowserSession) {
        shutdown(session).await;
        info!("Browser session released");
    }
}

async fn shutdown(mut session: BrowserSession) {
    if let Err(e) = session.browser.close().await {
        warn!("Failed to close browser: {e}");
    }
    session.handler_task.abort();
}

fn is_wayback_error_page(content: &str) -> bool {
    WAYBACK_ERROR_TEXTS.iter().any(|text| content.contains(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.viewport_width, DEFAULT_VIEWPORT_WIDTH);
        assert_eq!(config.viewport_height, DEFAULT_VIEWPORT_HEIGHT);
        assert_eq!(config.failure_threshold, 3);
        assert!(config.browser_path.is_none());
    }

    #[test]
    fn test_invalid_url_is_not_retryable() {
        let error = CaptureError::InvalidArchivedUrl {
            url: "not a url".to_string(),
            reason: "relative URL without a base".to_string(),
        };
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_transient_errors_are_retryable() {
        let timeout_error = CaptureError::NavigationTimeout {
            url: "https://web.archive.org/web/20200101000000/https://example.com/".to_string(),
            timeout: Duration::from_secs(30),
        };
        assert!(timeout_error.is_retryable());

        let session_error = CaptureError::Session(SessionError::Start {
            attempts: 3,
            reason: "no usable chromium".to_string(),
        });
        assert!(session_error.is_retryable());
    }

    #[test]
    fn test_detects_wayback_error_pages() {
        assert!(is_wayback_error_page(
            "<html><body>This snapshot cannot be displayed due to an internal error</body></html>"
        ));
        assert!(!is_wayback_error_page("<html><body>Hello</body></html>"));
    }
}
