//! Browser automation seam.
//!
//! Everything the scraping pipeline needs from a browser goes through
//! [`PageDriver`]. The WebDriver implementation lives in
//! [`crate::webdriver`]; tests drive the pipeline with scripted pages.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One element among the matches of a CSS selector
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementTarget {
    pub selector: String,
    /// Zero-based index into the selector's matches
    pub index: usize,
}

impl ElementTarget {
    pub fn new(selector: impl Into<String>, index: usize) -> Self {
        Self {
            selector: selector.into(),
            index,
        }
    }
}

impl std::fmt::Display for ElementTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]", self.selector, self.index)
    }
}

/// Interaction preconditions reported by the page
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementState {
    pub visible: bool,
    pub enabled: bool,
    /// Trimmed `innerText`
    #[serde(default)]
    pub text: String,
}

/// Capability set the pipeline requires from a live browser page.
///
/// Scripts passed to [`PageDriver::evaluate`] are function bodies: they
/// `return` their result and read arguments from `arguments[n]`.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Navigate and wait for the navigation to commit
    async fn goto(&self, url: &str) -> Result<()>;

    /// Poll `document.readyState` until complete; false if `timeout` elapsed first
    async fn wait_for_load(&self, timeout: std::time::Duration) -> Result<bool>;

    async fn evaluate(&self, script: &str, args: Vec<Value>) -> Result<Value>;

    /// Number of elements matching a CSS selector
    async fn count(&self, selector: &str) -> Result<usize>;

    /// Trimmed visible text of every element matching a CSS selector
    async fn element_texts(&self, selector: &str) -> Result<Vec<String>>;

    async fn element_state(&self, target: &ElementTarget) -> Result<ElementState>;

    async fn scroll_into_view(&self, target: &ElementTarget) -> Result<()>;

    async fn click(&self, target: &ElementTarget) -> Result<()>;

    async fn hover(&self, target: &ElementTarget) -> Result<()>;

    async fn focus(&self, target: &ElementTarget) -> Result<()>;

    /// Send Escape to the focused element
    async fn press_escape(&self) -> Result<()>;

    /// Serialized HTML of the current document
    async fn content(&self) -> Result<String>;

    /// Number of `<iframe>` elements in the top-level document
    async fn frame_count(&self) -> Result<usize>;

    /// Body HTML of the `index`th iframe. The driver returns to the
    /// top-level browsing context before returning, error or not.
    async fn frame_body(&self, index: usize) -> Result<String>;

    /// Release the page and its browser
    async fn close(&self) -> Result<()>;
}

/// Creates one isolated browser page per session attempt
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn PageDriver>>;
}

/// Name from a script's leading `/* pagesift:<name> */` marker
pub fn script_name(script: &str) -> Option<&str> {
    let rest = script.trim_start().strip_prefix("/* pagesift:")?;
    let end = rest.find("*/")?;
    Some(rest[..end].trim())
}

#[cfg(test)]
#[path = "page_test.rs"]
mod page_test;
