use serde::{Deserialize, Serialize};
use std::fmt;

/// Broad classification of a failure, used to drive the retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    /// DNS, connection and transport failures (exit code 6)
    Network,
    /// WebDriver or browser failures (exit code 4)
    Browser,
    /// Content model failures (exit code 7)
    AiService,
    /// Local I/O failures (exit code 8)
    Filesystem,
    /// Operation timeout (exit code 5)
    Timeout,
    /// Upstream rate limiting (exit code 9)
    RateLimit,
    /// Anything else (exit code 1)
    Unknown,
}

const RATE_LIMIT_PATTERNS: &[&str] = &["429", "rate limit", "rate-limit", "ratelimit", "too many requests", "quota exceeded"];
const TIMEOUT_PATTERNS: &[&str] = &["timed out", "timeout", "deadline has elapsed"];
const NETWORK_PATTERNS: &[&str] = &[
    "net::err",
    "err_name_not_resolved",
    "err_connection",
    "connection refused",
    "connection reset",
    "dns error",
    "failed to lookup address",
    "network",
    "unreachable",
    "econnrefused",
    "enotfound",
    "socket hang up",
];
const BROWSER_PATTERNS: &[&str] = &[
    "webdriver",
    "chromedriver",
    "geckodriver",
    "session not created",
    "invalid session id",
    "no such window",
    "stale element",
    "target closed",
    "browser",
    "javascript error",
];
const AI_SERVICE_PATTERNS: &[&str] = &["model api", "openai", "completion", "content analysis", "model response"];
const FILESYSTEM_PATTERNS: &[&str] = &["no such file", "permission denied", "read-only file system", "is a directory", "disk full"];

impl ErrorCategory {
    /// Classify an error from its message. Order matters: rate limiting and
    /// timeouts are recognised before the broader network/browser families.
    pub fn classify(message: &str) -> Self {
        let msg = message.to_lowercase();
        let matches = |patterns: &[&str]| patterns.iter().any(|p| msg.contains(p));

        if matches(RATE_LIMIT_PATTERNS) {
            ErrorCategory::RateLimit
        } else if matches(TIMEOUT_PATTERNS) {
            ErrorCategory::Timeout
        } else if matches(NETWORK_PATTERNS) {
            ErrorCategory::Network
        } else if matches(AI_SERVICE_PATTERNS) {
            ErrorCategory::AiService
        } else if matches(BROWSER_PATTERNS) {
            ErrorCategory::Browser
        } else if matches(FILESYSTEM_PATTERNS) {
            ErrorCategory::Filesystem
        } else {
            ErrorCategory::Unknown
        }
    }

    /// Categories worth another attempt of the whole session
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorCategory::Network
                | ErrorCategory::Timeout
                | ErrorCategory::Browser
                | ErrorCategory::Unknown
        )
    }

    /// Categories whose retries back off exponentially instead of linearly
    pub fn wants_exponential_backoff(self) -> bool {
        matches!(self, ErrorCategory::Network | ErrorCategory::RateLimit)
    }

    /// Get the CLI exit code for this category
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorCategory::Unknown => 1,
            ErrorCategory::Browser => 4,
            ErrorCategory::Timeout => 5,
            ErrorCategory::Network => 6,
            ErrorCategory::AiService => 7,
            ErrorCategory::Filesystem => 8,
            ErrorCategory::RateLimit => 9,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Browser => "browser",
            ErrorCategory::AiService => "ai-service",
            ErrorCategory::Filesystem => "filesystem",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::RateLimit => "rate-limit",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session-level error carrying its classification
#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("Navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },
    #[error("Browser failure: {0}")]
    Browser(String),
    #[error("Content analysis failed: {message}")]
    Analysis {
        category: ErrorCategory,
        message: String,
    },
    #[error("Operation timed out: {0}")]
    Timeout(String),
    #[error("Scrape cancelled")]
    Cancelled,
    #[error(transparent)]
    Other(anyhow::Error),
}

impl ScrapeError {
    /// Classification used by the retry policy
    pub fn category(&self) -> ErrorCategory {
        match self {
            ScrapeError::Navigation { message, .. } => match ErrorCategory::classify(message) {
                ErrorCategory::Unknown => ErrorCategory::Network,
                other => other,
            },
            ScrapeError::Browser(_) => ErrorCategory::Browser,
            ScrapeError::Analysis { category, .. } => *category,
            ScrapeError::Timeout(_) => ErrorCategory::Timeout,
            ScrapeError::Cancelled => ErrorCategory::Unknown,
            ScrapeError::Other(err) => ErrorCategory::classify(&format!("{:#}", err)),
        }
    }

    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        self.category().exit_code()
    }
}

impl From<anyhow::Error> for ScrapeError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<ScrapeError>() {
            Ok(scrape_err) => scrape_err,
            Err(err) => {
                let msg = format!("{:#}", err);
                match ErrorCategory::classify(&msg) {
                    ErrorCategory::Browser => ScrapeError::Browser(msg),
                    ErrorCategory::Timeout => ScrapeError::Timeout(msg),
                    _ => ScrapeError::Other(err),
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "errors_test.rs"]
mod errors_test;
