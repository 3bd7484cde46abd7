//! Shared constants used across the application.

/// User agent string used for archival HTTP requests.
///
/// This is a realistic browser user agent that is indistinguishable from a real browser,
/// making archival requests appear as normal browser traffic.
pub const ARCHIVAL_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Wayback Machine CDX index endpoint.
pub const CDX_API_URL: &str = "https://web.archive.org/cdx/search/cdx";

/// Prefix of Wayback Machine replay URLs; a 14-digit timestamp and the
/// original URL complete it.
pub const REPLAY_URL_PREFIX: &str = "https://web.archive.org/web/";

/// Timestamp format used by the CDX index and in replay URLs.
pub const CDX_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Number of index rows requested per CDX page.
pub const CDX_PAGE_SIZE: usize = 5000;

/// Body text of known Wayback Machine error pages.
///
/// The replay service sometimes serves these with a 200 status even when a
/// snapshot exists; a page containing one of them has not actually rendered.
pub const WAYBACK_ERROR_TEXTS: &[&str] = &[
    "This snapshot cannot be displayed due to an internal error",
    "The Wayback Machine requires your browser to support JavaScript",
    "Application error: a client-side exception has occurred",
];
