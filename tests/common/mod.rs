// Common test utilities and fixtures

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use pagesift::analyzer::{AnalysisError, AnalysisResponse, ContentAnalyzer, InteractionNeeded};
use pagesift::page::{BrowserLauncher, ElementState, ElementTarget, PageDriver, script_name};
use pagesift::progress::ProgressSink;
use pagesift::types::{CandidateElement, InteractionType, ProgressEvent};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

pub mod test_server;

/// Get the browser to use for testing from TEST_BROWSER env var
/// Defaults to "chrome" if not set
pub fn get_test_browser() -> &'static str {
    match std::env::var("TEST_BROWSER") {
        Ok(browser) if browser == "firefox" => "firefox",
        _ => "chrome",
    }
}

/// Mock HTML pages for testing
pub mod fixtures {
    pub const STATIC_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Desk Lamp</title><script>window.analytics = true;</script></head>
<body>
    <h1>Desk Lamp</h1>
    <p>An adjustable lamp with a warm LED.</p>
</body>
</html>"#;

    pub const TABBED_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Desk Lamp</title></head>
<body>
    <h1>Desk Lamp</h1>
    <p>An adjustable lamp with a warm LED.</p>
    <div class="tabs"><button id="tab-specs">Specifications</button><button id="tab-reviews">Reviews</button></div>
    <div id="tab-content"><p>Select a tab</p></div>
</body>
</html>"#;

    /// TABBED_PAGE with the specifications tab open
    pub const SPECS_OPEN: &str = r#"<!DOCTYPE html>
<html>
<head><title>Desk Lamp</title></head>
<body>
    <h1>Desk Lamp</h1>
    <p>An adjustable lamp with a warm LED.</p>
    <div class="tabs"><button id="tab-specs">Specifications</button><button id="tab-reviews">Reviews</button></div>
    <div id="tab-content"><div id="specs-panel"><p>Weight 2kg</p></div></div>
</body>
</html>"#;

    /// TABBED_PAGE with the reviews tab open
    pub const REVIEWS_OPEN: &str = r#"<!DOCTYPE html>
<html>
<head><title>Desk Lamp</title></head>
<body>
    <h1>Desk Lamp</h1>
    <p>An adjustable lamp with a warm LED.</p>
    <div class="tabs"><button id="tab-specs">Specifications</button><button id="tab-reviews">Reviews</button></div>
    <div id="tab-content"><div id="reviews-panel"><p>Great lamp</p></div></div>
</body>
</html>"#;
}

/// What a click on an element does to the fake page
#[derive(Clone, Default)]
pub struct Reaction {
    pub html: Option<String>,
    /// Raw tracker records returned by the next drain
    pub changes: Vec<Value>,
    pub opens_modal: bool,
}

impl Reaction {
    /// Swap the page HTML and report the element at `css_path` as added
    pub fn reveal(html: &str, css_path: &str) -> Self {
        let last = css_path.rsplit(' ').next().unwrap_or(css_path);
        let tag: String = last.chars().take_while(|c| c.is_ascii_alphanumeric()).collect();
        Self {
            html: Some(html.to_string()),
            changes: vec![json!({
                "changeType": "elementAdded",
                "tag": tag,
                "path": [],
                "cssPath": css_path,
                "rect": {"x": 0.0, "y": 300.0, "width": 800.0, "height": 120.0},
                "timestamp": 1_700_000_000_000.0_f64
            })],
            opens_modal: false,
        }
    }

    pub fn opening_modal(mut self) -> Self {
        self.opens_modal = true;
        self
    }
}

#[derive(Default)]
struct FakeState {
    html: String,
    texts: HashMap<String, Vec<String>>,
    states: HashMap<ElementTarget, ElementState>,
    reactions: HashMap<String, Reaction>,
    pending_changes: Vec<Value>,
    scroll_blocked: bool,
    modal_open: bool,
    navigation_error: Option<String>,
    calls: Vec<String>,
}

/// In-memory page that answers the pipeline's scripts by name. Clones share
/// state, so a test keeps one handle while the session owns another.
#[derive(Clone, Default)]
pub struct FakePage {
    state: Arc<Mutex<FakeState>>,
}

impl FakePage {
    pub fn new(html: &str) -> Self {
        let page = Self::default();
        page.state().html = html.to_string();
        page
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Register a visible, enabled element matched by `selector`
    pub fn with_element(self, selector: &str, text: &str) -> Self {
        {
            let mut state = self.state();
            state
                .texts
                .insert(selector.to_string(), vec![text.to_string()]);
            state.states.insert(
                ElementTarget::new(selector, 0),
                ElementState {
                    visible: true,
                    enabled: true,
                    text: text.to_string(),
                },
            );
        }
        self
    }

    pub fn on_click(self, selector: &str, reaction: Reaction) -> Self {
        self.state()
            .reactions
            .insert(selector.to_string(), reaction);
        self
    }

    pub fn failing_navigation(self, message: &str) -> Self {
        self.state().navigation_error = Some(message.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn count_calls(&self, call: &str) -> usize {
        self.state().calls.iter().filter(|c| *c == call).count()
    }

    pub fn html(&self) -> String {
        self.state().html.clone()
    }

    fn record(&self, call: String) {
        self.state().calls.push(call);
    }

    fn run_script(&self, name: &str, args: &[Value]) -> Value {
        let mut state = self.state();
        match name {
            "tracker-attach" | "tracker-detach" | "scroll-top" | "iframe-replace" => json!(true),
            "tracker-drain" => Value::Array(std::mem::take(&mut state.pending_changes)),
            "scroll-step" => json!(1000),
            "scroll-blocked" => json!(state.scroll_blocked),
            "overlay-scan" => {
                let candidates = if state.modal_open {
                    vec![json!({
                        "index": 0, "tag": "div", "cssPath": "div#newsletter",
                        "isDialog": true, "open": true, "visible": true,
                        "zIndex": "1000", "position": "fixed",
                        "rect": {"x": 340.0, "y": 200.0, "width": 600.0, "height": 400.0}
                    })]
                } else {
                    Vec::new()
                };
                json!({"viewport": {"width": 1280.0, "height": 800.0}, "candidates": candidates})
            }
            "overlay-visibility" => {
                let count = args.first().and_then(Value::as_array).map_or(0, Vec::len);
                json!(vec![state.modal_open; count])
            }
            "overlay-click-outside" | "overlay-force-hide" => {
                state.modal_open = false;
                state.scroll_blocked = false;
                json!(true)
            }
            "overlay-close-controls" => json!([]),
            _ => Value::Null,
        }
    }
}

#[async_trait]
impl PageDriver for FakePage {
    async fn goto(&self, url: &str) -> Result<()> {
        self.record(format!("goto:{url}"));
        if let Some(message) = self.state().navigation_error.clone() {
            anyhow::bail!("{}", message);
        }
        Ok(())
    }

    async fn wait_for_load(&self, _timeout: Duration) -> Result<bool> {
        Ok(true)
    }

    async fn evaluate(&self, script: &str, args: Vec<Value>) -> Result<Value> {
        let name = script_name(script).unwrap_or("inline").to_string();
        self.record(format!("evaluate:{name}"));
        Ok(self.run_script(&name, &args))
    }

    async fn count(&self, selector: &str) -> Result<usize> {
        Ok(self.state().texts.get(selector).map_or(0, Vec::len))
    }

    async fn element_texts(&self, selector: &str) -> Result<Vec<String>> {
        self.record(format!("texts:{selector}"));
        Ok(self.state().texts.get(selector).cloned().unwrap_or_default())
    }

    async fn element_state(&self, target: &ElementTarget) -> Result<ElementState> {
        self.state()
            .states
            .get(target)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no such element: {}", target))
    }

    async fn scroll_into_view(&self, _target: &ElementTarget) -> Result<()> {
        Ok(())
    }

    async fn click(&self, target: &ElementTarget) -> Result<()> {
        self.record(format!("click:{target}"));
        let mut state = self.state();
        if let Some(reaction) = state.reactions.get(&target.selector).cloned() {
            if let Some(html) = reaction.html {
                state.html = html;
            }
            state.pending_changes = reaction.changes;
            if reaction.opens_modal {
                state.modal_open = true;
                state.scroll_blocked = true;
            }
        }
        Ok(())
    }

    async fn hover(&self, target: &ElementTarget) -> Result<()> {
        self.record(format!("hover:{target}"));
        Ok(())
    }

    async fn focus(&self, target: &ElementTarget) -> Result<()> {
        self.record(format!("focus:{target}"));
        Ok(())
    }

    async fn press_escape(&self) -> Result<()> {
        self.record("escape".to_string());
        Ok(())
    }

    async fn content(&self) -> Result<String> {
        Ok(self.html())
    }

    async fn frame_count(&self) -> Result<usize> {
        Ok(0)
    }

    async fn frame_body(&self, index: usize) -> Result<String> {
        anyhow::bail!("no such frame {}", index)
    }

    async fn close(&self) -> Result<()> {
        self.record("close".to_string());
        Ok(())
    }
}

/// Hands out the same fake page on every launch
pub struct FakeLauncher {
    page: FakePage,
    launch_error: Option<String>,
    launches: AtomicU32,
}

impl FakeLauncher {
    pub fn new(page: FakePage) -> Arc<Self> {
        Arc::new(Self {
            page,
            launch_error: None,
            launches: AtomicU32::new(0),
        })
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            page: FakePage::default(),
            launch_error: Some(message.to_string()),
            launches: AtomicU32::new(0),
        })
    }

    pub fn launches(&self) -> u32 {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self) -> Result<Box<dyn PageDriver>> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.launch_error {
            anyhow::bail!("{}", message);
        }
        Ok(Box::new(self.page.clone()))
    }
}

type Reply = Box<dyn Fn() -> Result<AnalysisResponse, AnalysisError> + Send + Sync>;

/// Content analyzer with a canned reply
pub struct FakeAnalyzer {
    reply: Reply,
    delay: Option<Duration>,
    calls: AtomicUsize,
    snapshots: Mutex<Vec<String>>,
}

impl FakeAnalyzer {
    pub fn replying(reply: impl Fn() -> Result<AnalysisResponse, AnalysisError> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            reply: Box::new(reply),
            delay: None,
            calls: AtomicUsize::new(0),
            snapshots: Mutex::new(Vec::new()),
        })
    }

    /// Answers YES with clickable candidates `(selector, text)`
    pub fn clicking(candidates: &[(&str, &str)]) -> Arc<Self> {
        let elements: Vec<CandidateElement> = candidates
            .iter()
            .map(|(selector, text)| CandidateElement {
                selector: selector.to_string(),
                text_content: text.to_string(),
                interaction_type: InteractionType::Click,
                reason: "tab panel not rendered".to_string(),
            })
            .collect();
        Self::replying(move || {
            Ok(AnalysisResponse {
                interaction_needed: InteractionNeeded::Yes,
                analysis: "content behind tabs".to_string(),
                elements: elements.clone(),
            })
        })
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            reply: Box::new(|| {
                Ok(AnalysisResponse {
                    interaction_needed: InteractionNeeded::No,
                    analysis: String::new(),
                    elements: Vec::new(),
                })
            }),
            delay: Some(delay),
            calls: AtomicUsize::new(0),
            snapshots: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn snapshots(&self) -> Vec<String> {
        self.snapshots.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContentAnalyzer for FakeAnalyzer {
    async fn analyze(&self, snapshot: &str, _query: Option<&str>) -> Result<AnalysisResponse, AnalysisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.snapshots.lock().unwrap().push(snapshot.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.reply)()
    }
}

/// Progress sink that keeps every event
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
    cancel_when: Option<(fn(&ProgressEvent) -> bool, CancellationToken)>,
}

impl RecordingSink {
    /// Cancels `token` on the first event matching `trigger`
    pub fn cancelling(trigger: fn(&ProgressEvent) -> bool, token: CancellationToken) -> Self {
        Self {
            events: Mutex::default(),
            cancel_when: Some((trigger, token)),
        }
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl ProgressSink for RecordingSink {
    fn emit(&self, event: ProgressEvent) {
        if let Some((trigger, token)) = &self.cancel_when
            && trigger(&event)
        {
            token.cancel();
        }
        self.events.lock().unwrap().push(event);
    }
}
