//! # pagesift
#![allow(clippy::uninlined_format_args)]
//!
//! Extract LLM-readable Markdown from web pages, including content that only
//! appears after the page is interacted with: tabs, accordions, "show more"
//! toggles, modals and lazy-loaded sections.
//!
//! ## Modes
//!
//! - **normal**: load the page in a real browser, let it settle, inline its
//!   iframes and convert the sanitized HTML.
//! - **beast**: additionally ask a content model which elements hide
//!   content, interact with each one, record what changed in the DOM and
//!   merge every revealed fragment back into a single document.
//!
//! ## CLI Usage
//!
//! ```bash
//! # Static extraction
//! pagesift scrape "https://example.com/product"
//!
//! # Interactive discovery, steered by a question
//! pagesift scrape "https://example.com/product" --mode beast --query "shipping costs"
//!
//! # Full structured result, including the phase log
//! pagesift scrape "https://example.com" --format json | jq '.phase_log'
//!
//! # Firefox with a visible window
//! pagesift scrape "https://example.com" --browser firefox --no-headless
//! ```
//!
//! Logs go to stderr (`RUST_LOG=pagesift=debug` for more); stdout only
//! carries the result. On failure a JSON error object is printed and the
//! process exits with the code of the failure's [`ErrorCategory`].
//!
//! ## Configuration
//!
//! `--config PATH`, else `$XDG_CONFIG_HOME/pagesift/config.toml`:
//!
//! ```toml
//! [browser]
//! browser = "chrome"
//! viewport = "1280x800"
//!
//! [timeouts]
//! session_deadline = 120000
//!
//! [model]
//! api_key = "${OPENAI_API_KEY}"
//! model = "gpt-4o-mini"
//! ```
//!
//! ## Library Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use pagesift::{
//!     DriverManager, LaunchOptions, OpenAiAnalyzer, ScrapeConfig, ScrapeMode, ScrapeRequest,
//!     Scraper, WebDriverLauncher,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = ScrapeConfig::default();
//! let launcher = WebDriverLauncher::new(
//!     LaunchOptions::from_config(&config)?,
//!     Arc::new(DriverManager::new()),
//! );
//! let analyzer = OpenAiAnalyzer::new(config.model.clone(), Duration::from_secs(60));
//! let scraper = Scraper::new(config, Arc::new(launcher), Arc::new(analyzer));
//!
//! let result = scraper
//!     .scrape(
//!         ScrapeRequest::new("https://example.com", ScrapeMode::Beast),
//!         CancellationToken::new(),
//!     )
//!     .await;
//! println!("{}", result.markdown.unwrap_or_default());
//! # Ok(())
//! # }
//! ```

/// Content model seam and the OpenAI-compatible implementation
pub mod analyzer;

/// TOML configuration with environment expansion
pub mod config;

/// Mutable HTML document over `scraper`
pub mod dom;

/// Locating and starting WebDriver processes
pub mod driver_manager;

/// Error taxonomy and exit codes
pub mod errors;

/// Interacting with candidate elements
pub mod interaction;

/// Stable element locators
pub mod locator;

/// HTML to Markdown conversion
pub mod markdown;

/// Modal and overlay detection and dismissal
pub mod overlay;

/// Browser automation seam
pub mod page;

/// Progress reporting
pub mod progress;

/// XPath and CSS selector evaluation over [`dom::Document`]
pub mod query;

/// Merging revealed content into the page
pub mod reconciler;

/// Session-level retries
pub mod retry;

/// HTML clean-up
pub mod sanitize;

/// Session orchestration
pub mod session;

/// Lazy-content scrolling and iframe inlining
pub mod stabilize;

/// DOM change tracking
pub mod tracker;

/// Type definitions for requests, results and observed changes
pub mod types;

/// WebDriver-backed browser pages
pub mod webdriver;

#[cfg(test)]
mod test_support;

pub use analyzer::{AnalysisResponse, ContentAnalyzer, OpenAiAnalyzer};
pub use config::ScrapeConfig;
pub use driver_manager::DriverManager;
pub use errors::{ErrorCategory, ScrapeError};
pub use page::{BrowserLauncher, PageDriver};
pub use session::Scraper;
pub use types::{
    CandidateElement, InteractionType, ProgressEvent, ScrapeMode, ScrapeOutcome, ScrapeRequest,
    ScrapeResult,
};
pub use webdriver::{BrowserType, LaunchOptions, WebDriverLauncher};
