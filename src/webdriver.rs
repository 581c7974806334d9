use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use fantoccini::elements::Element;
use fantoccini::{Client, ClientBuilder, Locator};
use serde_json::{Value, json};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::config::ScrapeConfig;
use crate::driver_manager::DriverManager;
use crate::page::{BrowserLauncher, ElementState, ElementTarget, PageDriver, script_name};
use crate::types::ViewportSize;

/// WebDriver key code for Escape
const ESCAPE_KEY: &str = "\u{e00c}";

/// Supported browser types
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BrowserType {
    /// Mozilla Firefox
    Firefox,
    /// Google Chrome/Chromium
    Chrome,
}

impl std::str::FromStr for BrowserType {
    type Err = anyhow::Error;

    /// Parse browser type from string (case-insensitive)
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "firefox" => Ok(BrowserType::Firefox),
            "chrome" | "chromium" => Ok(BrowserType::Chrome),
            _ => anyhow::bail!("Unsupported browser: {}", s),
        }
    }
}

impl BrowserType {
    pub fn driver_command(&self) -> &'static str {
        match self {
            BrowserType::Firefox => "geckodriver",
            BrowserType::Chrome => "chromedriver",
        }
    }

    /// Where a manually started driver listens by default
    pub fn default_webdriver_url(&self) -> &'static str {
        match self {
            BrowserType::Firefox => "http://localhost:4444",
            BrowserType::Chrome => "http://localhost:9515",
        }
    }
}

/// How to start a browser for one session attempt
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub browser_type: BrowserType,
    pub headless: bool,
    pub viewport: Option<ViewportSize>,
    /// Use this WebDriver instead of locating or starting one
    pub webdriver_url: Option<String>,
}

impl LaunchOptions {
    pub fn from_config(config: &ScrapeConfig) -> Result<Self> {
        Ok(Self {
            browser_type: config.browser.browser_type()?,
            headless: config.browser.headless,
            viewport: Some(config.browser.viewport_size()?),
            webdriver_url: config.browser.webdriver_url.clone(),
        })
    }

    /// W3C capabilities for the new session
    pub fn capabilities(&self, profile_dir: Option<&std::path::Path>) -> serde_json::Map<String, Value> {
        let mut caps = serde_json::Map::new();

        match self.browser_type {
            BrowserType::Firefox => {
                let mut args = Vec::new();
                if self.headless {
                    args.push("--headless".to_string());
                }
                if let Some(vp) = &self.viewport {
                    args.push(format!("--width={}", vp.width));
                    args.push(format!("--height={}", vp.height));
                }
                caps.insert("moz:firefoxOptions".to_string(), json!({ "args": args }));
            }
            BrowserType::Chrome => {
                let mut args = vec!["--no-sandbox".to_string()];
                if self.headless {
                    // Chrome 112+ headless mode
                    args.push("--headless=new".to_string());
                    args.push("--disable-gpu".to_string());
                    args.push("--disable-dev-shm-usage".to_string());
                }
                if let Some(vp) = &self.viewport {
                    args.push(format!("--window-size={},{}", vp.width, vp.height));
                }
                if let Some(dir) = profile_dir {
                    args.push(format!("--user-data-dir={}", dir.display()));
                }
                caps.insert("goog:chromeOptions".to_string(), json!({ "args": args }));
            }
        }

        caps
    }
}

/// Browser page driven over WebDriver
pub struct Browser {
    client: Client,
    browser_type: BrowserType,
    /// Chrome refuses to share profile directories between sessions;
    /// removed when the browser is dropped
    _profile_dir: Option<TempDir>,
}

impl Browser {
    /// Start a new isolated browser session
    pub async fn launch(options: &LaunchOptions, drivers: &DriverManager) -> Result<Self> {
        info!("Connecting to {:?} WebDriver", options.browser_type);

        let webdriver_url = match &options.webdriver_url {
            Some(url) => url.clone(),
            None => drivers.ensure_driver(options.browser_type).await?,
        };

        if !DriverManager::is_driver_running(&webdriver_url).await {
            let driver_name = options.browser_type.driver_command();
            anyhow::bail!(
                "Cannot connect to {} WebDriver at {}.\n\
                Please ensure {} is running:\n\
                  For Firefox: geckodriver --port 4444\n\
                  For Chrome: chromedriver --port 9515",
                driver_name,
                webdriver_url,
                driver_name
            );
        }

        let profile_dir = match options.browser_type {
            BrowserType::Chrome => Some(
                tempfile::Builder::new()
                    .prefix("pagesift-chrome-")
                    .tempdir()
                    .context("Failed to create browser profile directory")?,
            ),
            BrowserType::Firefox => None,
        };
        let caps = options.capabilities(profile_dir.as_ref().map(|dir| dir.path()));

        debug!("Connecting to WebDriver at {}", webdriver_url);
        let client = ClientBuilder::rustls()
            .capabilities(caps)
            .connect(&webdriver_url)
            .await
            .context("Failed to connect to WebDriver session")?;

        if let Some(vp) = options.viewport {
            debug!("Setting viewport to {}x{}", vp.width, vp.height);
            if let Err(e) = client.set_window_size(vp.width, vp.height).await {
                // Best-effort; headless Chrome already honors --window-size
                debug!("Could not set window size: {}", e);
            }
        }

        Ok(Browser {
            client,
            browser_type: options.browser_type,
            _profile_dir: profile_dir,
        })
    }

    pub fn browser_type(&self) -> BrowserType {
        self.browser_type
    }

    async fn element(&self, target: &ElementTarget) -> Result<Element> {
        let elements = self
            .client
            .find_all(Locator::Css(&target.selector))
            .await
            .context(format!("Invalid selector: {}", target.selector))?;
        let total = elements.len();
        elements.into_iter().nth(target.index).ok_or_else(|| {
            anyhow::anyhow!(
                "No such element: index {} out of bounds, {} element(s) match '{}'",
                target.index,
                total,
                target.selector
            )
        })
    }

    async fn execute_on(&self, target: &ElementTarget, script: &str) -> Result<Value> {
        let element = self.element(target).await?;
        let arg = serde_json::to_value(&element).context("Failed to serialize element reference")?;
        self.client
            .execute(script, vec![arg])
            .await
            .context(format!("Failed to execute script on {}", target))
    }
}

#[async_trait]
impl PageDriver for Browser {
    async fn goto(&self, url: &str) -> Result<()> {
        info!("Navigating to {}", url);
        self.client
            .goto(url)
            .await
            .context(format!("Navigation to {} failed", url))?;
        Ok(())
    }

    async fn wait_for_load(&self, timeout: Duration) -> Result<bool> {
        let wait_script = "return document.readyState === 'complete';";
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            match self.client.execute(wait_script, vec![]).await {
                Ok(val) if val.as_bool().unwrap_or(false) => return Ok(true),
                Ok(_) => {}
                Err(e) => debug!("readyState check failed: {}", e),
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    async fn evaluate(&self, script: &str, args: Vec<Value>) -> Result<Value> {
        debug!("Evaluating {}", script_name(script).unwrap_or("inline script"));
        self.client
            .execute(script, args)
            .await
            .context("Failed to execute script")
    }

    async fn count(&self, selector: &str) -> Result<usize> {
        let elements = self
            .client
            .find_all(Locator::Css(selector))
            .await
            .context(format!("Invalid selector: {}", selector))?;
        Ok(elements.len())
    }

    async fn element_texts(&self, selector: &str) -> Result<Vec<String>> {
        let script = r#"
            return Array.from(document.querySelectorAll(arguments[0]))
                .map(el => (el.innerText || el.textContent || '').trim());
        "#;
        let value = self
            .client
            .execute(script, vec![json!(selector)])
            .await
            .context(format!("Failed to read texts for {}", selector))?;
        Ok(serde_json::from_value(value).unwrap_or_default())
    }

    async fn element_state(&self, target: &ElementTarget) -> Result<ElementState> {
        let script = r#"
            const el = arguments[0];
            const style = window.getComputedStyle(el);
            const rect = el.getBoundingClientRect();
            const visible = style.display !== 'none'
                && style.visibility !== 'hidden'
                && parseFloat(style.opacity || '1') > 0
                && rect.width > 0 && rect.height > 0;
            const enabled = !el.disabled && el.getAttribute('aria-disabled') !== 'true';
            return { visible, enabled, text: (el.innerText || el.textContent || '').trim() };
        "#;
        let value = self.execute_on(target, script).await?;
        serde_json::from_value(value).context("Unexpected element state payload")
    }

    async fn scroll_into_view(&self, target: &ElementTarget) -> Result<()> {
        self.execute_on(
            target,
            "arguments[0].scrollIntoView({block: 'center', inline: 'center'});",
        )
        .await?;
        Ok(())
    }

    async fn click(&self, target: &ElementTarget) -> Result<()> {
        let element = self.element(target).await?;
        element
            .click()
            .await
            .context(format!("Click on {} failed", target))?;
        Ok(())
    }

    async fn hover(&self, target: &ElementTarget) -> Result<()> {
        let script = r#"
            const el = arguments[0];
            const rect = el.getBoundingClientRect();
            const init = {
                bubbles: true,
                cancelable: true,
                view: window,
                clientX: rect.left + rect.width / 2,
                clientY: rect.top + rect.height / 2
            };
            for (const type of ['pointerover', 'pointerenter', 'mouseover', 'mouseenter', 'mousemove']) {
                const Ctor = type.startsWith('pointer') && window.PointerEvent ? PointerEvent : MouseEvent;
                el.dispatchEvent(new Ctor(type, init));
            }
        "#;
        self.execute_on(target, script).await?;
        Ok(())
    }

    async fn focus(&self, target: &ElementTarget) -> Result<()> {
        self.execute_on(target, "arguments[0].focus();").await?;
        Ok(())
    }

    async fn press_escape(&self) -> Result<()> {
        match self.client.active_element().await {
            Ok(active) => {
                active
                    .send_keys(ESCAPE_KEY)
                    .await
                    .context("Failed to send Escape")?;
            }
            Err(e) => {
                debug!("No active element for Escape ({}), dispatching on document", e);
                let script = r#"
                    const init = { key: 'Escape', code: 'Escape', keyCode: 27, bubbles: true };
                    document.dispatchEvent(new KeyboardEvent('keydown', init));
                    document.dispatchEvent(new KeyboardEvent('keyup', init));
                "#;
                self.client
                    .execute(script, vec![])
                    .await
                    .context("Failed to dispatch Escape")?;
            }
        }
        Ok(())
    }

    async fn content(&self) -> Result<String> {
        self.client.source().await.context("Failed to read page source")
    }

    async fn frame_count(&self) -> Result<usize> {
        self.count("iframe").await
    }

    async fn frame_body(&self, index: usize) -> Result<String> {
        let frame = self.element(&ElementTarget::new("iframe", index)).await?;
        frame
            .enter_frame()
            .await
            .context(format!("Failed to enter iframe {}", index))?;

        let body = self
            .client
            .execute("return document.body ? document.body.innerHTML : '';", vec![])
            .await
            .context(format!("Failed to read iframe {} body", index));

        if let Err(e) = self.client.enter_parent_frame().await {
            warn!("Failed to leave iframe {}: {}", index, e);
            self.client
                .enter_frame(None)
                .await
                .context("Failed to return to the top-level document")?;
        }

        Ok(body?.as_str().unwrap_or_default().to_string())
    }

    async fn close(&self) -> Result<()> {
        self.client
            .clone()
            .close()
            .await
            .context("Failed to close browser session")?;
        Ok(())
    }
}

/// Launches WebDriver-backed browsers, starting drivers as needed
pub struct WebDriverLauncher {
    options: LaunchOptions,
    drivers: Arc<DriverManager>,
}

impl WebDriverLauncher {
    pub fn new(options: LaunchOptions, drivers: Arc<DriverManager>) -> Self {
        Self { options, drivers }
    }
}

#[async_trait]
impl BrowserLauncher for WebDriverLauncher {
    async fn launch(&self) -> Result<Box<dyn PageDriver>> {
        let browser = Browser::launch(&self.options, &self.drivers).await?;
        Ok(Box::new(browser))
    }
}

#[cfg(test)]
#[path = "webdriver_test.rs"]
mod webdriver_test;
