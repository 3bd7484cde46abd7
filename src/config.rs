use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use thiserror::Error;
use url::Url;

use crate::archiver::{
    CollectorConfig, SessionConfig, DEFAULT_PAGE_TIMEOUT_SECS, DEFAULT_RENDER_DELAY_SECS,
    DEFAULT_VIEWPORT_HEIGHT, DEFAULT_VIEWPORT_WIDTH,
};
use crate::selection::{Interval, SnapshotRequest};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("failed to parse {name} as date: {source}")]
    ParseDate {
        name: String,
        #[source]
        source: chrono::ParseError,
    },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Collection request
    pub source_urls: Vec<Url>,
    pub interval: Interval,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub max_snapshots_per_url: Option<usize>,
    pub max_lookaround_days: Option<u32>,

    // Browser
    pub browser_path: Option<PathBuf>,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub navigation_timeout: Duration,
    pub render_delay: Duration,
    pub browser_launch_attempts: u32,
    pub session_failure_threshold: u32,

    // Archive pacing and retries
    pub pacing_interval: Duration,
    pub max_attempts: u32,
    pub retry_backoff: Duration,

    // Output
    pub output_dir: PathBuf,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let end = match optional_env("END_DATE") {
            Some(value) => parse_date("END_DATE", &value)?,
            None => Utc::now(),
        };

        Ok(Self {
            // Collection request
            source_urls: parse_url_list("SOURCE_URLS", &required_env("SOURCE_URLS")?)?,
            interval: parse_interval(
                &env_or_default("INTERVAL", "first"),
                parse_env_opt_u32("INTERVAL_STEP_DAYS")?,
            )?,
            start: parse_date("START_DATE", &required_env("START_DATE")?)?,
            end,
            max_snapshots_per_url: parse_env_opt_usize("MAX_SNAPSHOTS_PER_URL")?,
            max_lookaround_days: parse_env_opt_u32("MAX_LOOKAROUND_DAYS")?,

            // Browser
            browser_path: optional_env("BROWSER_PATH").map(PathBuf::from),
            viewport_width: parse_env_u32("VIEWPORT_WIDTH", DEFAULT_VIEWPORT_WIDTH)?,
            viewport_height: parse_env_u32("VIEWPORT_HEIGHT", DEFAULT_VIEWPORT_HEIGHT)?,
            navigation_timeout: Duration::from_secs(parse_env_u64(
                "NAVIGATION_TIMEOUT_SECS",
                DEFAULT_PAGE_TIMEOUT_SECS,
            )?),
            render_delay: Duration::from_secs(parse_env_u64(
                "RENDER_DELAY_SECS",
                DEFAULT_RENDER_DELAY_SECS,
            )?),
            browser_launch_attempts: parse_env_u32("BROWSER_LAUNCH_ATTEMPTS", 3)?,
            session_failure_threshold: parse_env_u32("SESSION_FAILURE_THRESHOLD", 3)?,

            // Archive pacing and retries
            pacing_interval: Duration::from_millis(parse_env_u64("PACING_INTERVAL_MS", 1500)?),
            max_attempts: parse_env_u32("MAX_ATTEMPTS", 3)?,
            retry_backoff: Duration::from_secs(parse_env_u64("RETRY_BACKOFF_SECS", 2)?),

            // Output
            output_dir: PathBuf::from(env_or_default("OUTPUT_DIR", "./data/screenshots")),
        })
    }

    /// Validate that the configuration is usable.
    ///
    /// Runs before any network activity so bad input fails fast.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source_urls.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "SOURCE_URLS".to_string(),
                message: "must list at least one URL".to_string(),
            });
        }
        if self.start > self.end {
            return Err(ConfigError::InvalidValue {
                name: "START_DATE".to_string(),
                message: "start date must not be after end date".to_string(),
            });
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                name: "MAX_ATTEMPTS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.browser_launch_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                name: "BROWSER_LAUNCH_ATTEMPTS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.viewport_width == 0 || self.viewport_height == 0 {
            return Err(ConfigError::InvalidValue {
                name: "VIEWPORT_WIDTH".to_string(),
                message: "viewport dimensions must be non-zero".to_string(),
            });
        }
        if self.navigation_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: "NAVIGATION_TIMEOUT_SECS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if let Some(path) = &self.browser_path {
            if !path.exists() {
                return Err(ConfigError::InvalidValue {
                    name: "BROWSER_PATH".to_string(),
                    message: format!("browser binary not found at {}", path.display()),
                });
            }
        }
        Ok(())
    }

    /// One snapshot request per source URL.
    #[must_use]
    pub fn snapshot_requests(&self) -> Vec<SnapshotRequest> {
        self.source_urls
            .iter()
            .map(|source_url| SnapshotRequest {
                source_url: source_url.clone(),
                interval: self.interval,
                start: self.start,
                end: self.end,
                max_per_url: self.max_snapshots_per_url,
                max_lookaround: self
                    .max_lookaround_days
                    .map(|days| chrono::Duration::days(i64::from(days))),
            })
            .collect()
    }

    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            browser_path: self.browser_path.clone(),
            viewport_width: self.viewport_width,
            viewport_height: self.viewport_height,
            navigation_timeout: self.navigation_timeout,
            render_delay: self.render_delay,
            launch_attempts: self.browser_launch_attempts,
            failure_threshold: self.session_failure_threshold,
        }
    }

    #[must_use]
    pub fn collector_config(&self) -> CollectorConfig {
        CollectorConfig {
            max_attempts: self.max_attempts,
            retry_backoff: self.retry_backoff,
        }
    }
}

fn required_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    optional_env(name).unwrap_or_else(|| default.to_string())
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match optional_env(name) {
        Some(value) => value.parse().map_err(|source| ConfigError::ParseInt {
            name: name.to_string(),
            source,
        }),
        None => Ok(default),
    }
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match optional_env(name) {
        Some(value) => value.parse().map_err(|source| ConfigError::ParseInt {
            name: name.to_string(),
            source,
        }),
        None => Ok(default),
    }
}

fn parse_env_opt_u32(name: &str) -> Result<Option<u32>, ConfigError> {
    optional_env(name)
        .map(|value| {
            value.parse().map_err(|source| ConfigError::ParseInt {
                name: name.to_string(),
                source,
            })
        })
        .transpose()
}

fn parse_env_opt_usize(name: &str) -> Result<Option<usize>, ConfigError> {
    optional_env(name)
        .map(|value| {
            value.parse().map_err(|source| ConfigError::ParseInt {
                name: name.to_string(),
                source,
            })
        })
        .transpose()
}

/// Parse a `YYYY-MM-DD` date as midnight UTC.
fn parse_date(name: &str, value: &str) -> Result<DateTime<Utc>, ConfigError> {
    let date = NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|source| {
        ConfigError::ParseDate {
            name: name.to_string(),
            source,
        }
    })?;
    Ok(date.and_time(NaiveTime::MIN).and_utc())
}

fn parse_interval(value: &str, step_days: Option<u32>) -> Result<Interval, ConfigError> {
    match value.to_lowercase().as_str() {
        "first" => Ok(Interval::First),
        "daily" => Ok(Interval::Daily),
        "weekly" => Ok(Interval::Weekly),
        "monthly" => Ok(Interval::Monthly),
        "yearly" => Ok(Interval::Yearly),
        "custom" => match step_days {
            Some(step) if step >= 1 => Ok(Interval::Custom { step_days: step }),
            Some(_) => Err(ConfigError::InvalidValue {
                name: "INTERVAL_STEP_DAYS".to_string(),
                message: "must be at least 1".to_string(),
            }),
            None => Err(ConfigError::InvalidValue {
                name: "INTERVAL_STEP_DAYS".to_string(),
                message: "required when INTERVAL is custom".to_string(),
            }),
        },
        other => Err(ConfigError::InvalidValue {
            name: "INTERVAL".to_string(),
            message: format!("unknown interval '{other}'"),
        }),
    }
}

/// Parse a comma- or newline-separated list of absolute URLs.
fn parse_url_list(name: &str, value: &str) -> Result<Vec<Url>, ConfigError> {
    let mut urls = Vec::new();
    for part in value.split([',', '\n']) {
        let trimmed = part.trim();
        if trimmed.is_empty() {
            continue;
        }
        let url = Url::parse(trimmed).map_err(|e| ConfigError::InvalidValue {
            name: name.to_string(),
            message: format!("'{trimmed}' is not a valid URL: {e}"),
        })?;
        urls.push(url);
    }
    if urls.is_empty() {
        return Err(ConfigError::InvalidValue {
            name: name.to_string(),
            message: "must list at least one URL".to_string(),
        });
    }
    Ok(urls)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            source_urls: vec![Url::parse("https://example.com/").expect("valid test url")],
            interval: Interval::Yearly,
            start: parse_date("START_DATE", "2015-01-01").expect("valid test date"),
            end: parse_date("END_DATE", "2018-01-01").expect("valid test date"),
            max_snapshots_per_url: None,
            max_lookaround_days: None,
            browser_path: None,
            viewport_width: DEFAULT_VIEWPORT_WIDTH,
            viewport_height: DEFAULT_VIEWPORT_HEIGHT,
            navigation_timeout: Duration::from_secs(30),
            render_delay: Duration::from_secs(6),
            browser_launch_attempts: 3,
            session_failure_threshold: 3,
            pacing_interval: Duration::from_millis(1500),
            max_attempts: 3,
            retry_backoff: Duration::from_secs(2),
            output_dir: PathBuf::from("./data/screenshots"),
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn test_inverted_date_range_fails() {
        let mut config = test_config();
        std::mem::swap(&mut config.start, &mut config.end);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_attempts_fails() {
        let config = Config {
            max_attempts: 0,
            ..test_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_browser_binary_fails() {
        let config = Config {
            browser_path: Some(PathBuf::from("/nonexistent/chromium")),
            ..test_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_interval() {
        assert_eq!(
            parse_interval("monthly", None).expect("valid interval"),
            Interval::Monthly
        );
        assert_eq!(
            parse_interval("Custom", Some(10)).expect("valid interval"),
            Interval::Custom { step_days: 10 }
        );
        assert!(parse_interval("custom", None).is_err());
        assert!(parse_interval("custom", Some(0)).is_err());
        assert!(parse_interval("hourly", None).is_err());
    }

    #[test]
    fn test_parse_date() {
        let parsed = parse_date("START_DATE", "2015-06-01").expect("valid date");
        assert_eq!(parsed.to_rfc3339(), "2015-06-01T00:00:00+00:00");
        assert!(parse_date("START_DATE", "01/06/2015").is_err());
    }

    #[test]
    fn test_parse_url_list() {
        let urls = parse_url_list(
            "SOURCE_URLS",
            "https://example.com/, https://example.org/\nhttps://example.net/",
        )
        .expect("valid url list");
        assert_eq!(urls.len(), 3);

        assert!(parse_url_list("SOURCE_URLS", "not-a-url").is_err());
        assert!(parse_url_list("SOURCE_URLS", "  ,\n ").is_err());
    }

    #[test]
    fn test_snapshot_requests_one_per_url() {
        let mut config = test_config();
        config.source_urls.push(Url::parse("https://example.org/").expect("valid test url"));
        config.max_lookaround_days = Some(30);

        let requests = config.snapshot_requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].max_lookaround, Some(chrono::Duration::days(30)));
    }
}
