//! Capture pipeline: pacing, browser sessions, and orchestration.

pub mod collector;
pub mod pacing;
pub mod session;

pub use collector::{Collector, CollectorConfig, RunSummary};
pub use pacing::Pacer;
pub use session::{
    BrowserSession, CaptureBackend, CaptureError, SessionConfig, SessionError, SessionManager,
    DEFAULT_PAGE_TIMEOUT_SECS, DEFAULT_RENDER_DELAY_SECS, DEFAULT_VIEWPORT_HEIGHT,
    DEFAULT_VIEWPORT_WIDTH,
};
