//! Scripted `PageDriver` for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::page::{ElementState, ElementTarget, PageDriver, script_name};

/// Page whose answers are queued up front. Script results are keyed by the
/// script's `pagesift:<name>` marker; every call is appended to `calls`.
#[derive(Default)]
pub struct ScriptedPage {
    pub html: Mutex<String>,
    pub script_results: Mutex<HashMap<String, VecDeque<Value>>>,
    pub texts: Mutex<HashMap<String, Vec<String>>>,
    pub states: Mutex<HashMap<ElementTarget, ElementState>>,
    /// Action name (`click`, `hover`, `escape`, `goto`, ...) to error message
    pub failures: Mutex<HashMap<String, String>>,
    pub frames: Mutex<Vec<Result<String, String>>>,
    pub calls: Mutex<Vec<String>>,
    /// Artificial latency for clicks
    pub click_delay: Option<Duration>,
}

impl ScriptedPage {
    pub fn with_html(html: &str) -> Self {
        let page = Self::default();
        *page.html.lock().unwrap() = html.to_string();
        page
    }

    pub fn queue(&self, script: &str, value: Value) {
        self.script_results
            .lock()
            .unwrap()
            .entry(script.to_string())
            .or_default()
            .push_back(value);
    }

    pub fn set_texts(&self, selector: &str, texts: &[&str]) {
        self.texts.lock().unwrap().insert(
            selector.to_string(),
            texts.iter().map(|t| t.to_string()).collect(),
        );
    }

    pub fn set_state(&self, selector: &str, index: usize, visible: bool, enabled: bool) {
        let text = self
            .texts
            .lock()
            .unwrap()
            .get(selector)
            .and_then(|texts| texts.get(index).cloned())
            .unwrap_or_default();
        self.states.lock().unwrap().insert(
            ElementTarget::new(selector, index),
            ElementState {
                visible,
                enabled,
                text,
            },
        );
    }

    pub fn fail(&self, action: &str, message: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(action.to_string(), message.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) -> Result<()> {
        let action = call.split(':').next().unwrap_or_default().to_string();
        self.calls.lock().unwrap().push(call);
        if let Some(message) = self.failures.lock().unwrap().get(&action) {
            anyhow::bail!("{}", message);
        }
        Ok(())
    }
}

#[async_trait]
impl PageDriver for ScriptedPage {
    async fn goto(&self, url: &str) -> Result<()> {
        self.record(format!("goto:{url}"))
    }

    async fn wait_for_load(&self, _timeout: Duration) -> Result<bool> {
        self.record("wait_for_load".to_string())?;
        Ok(true)
    }

    async fn evaluate(&self, script: &str, _args: Vec<Value>) -> Result<Value> {
        let name = script_name(script).unwrap_or("inline").to_string();
        self.record(format!("evaluate:{name}"))?;
        let value = self
            .script_results
            .lock()
            .unwrap()
            .get_mut(&name)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Value::Null);
        Ok(value)
    }

    async fn count(&self, selector: &str) -> Result<usize> {
        self.record(format!("count:{selector}"))?;
        Ok(self
            .texts
            .lock()
            .unwrap()
            .get(selector)
            .map(Vec::len)
            .unwrap_or(0))
    }

    async fn element_texts(&self, selector: &str) -> Result<Vec<String>> {
        self.record(format!("texts:{selector}"))?;
        Ok(self
            .texts
            .lock()
            .unwrap()
            .get(selector)
            .cloned()
            .unwrap_or_default())
    }

    async fn element_state(&self, target: &ElementTarget) -> Result<ElementState> {
        self.record(format!("state:{target}"))?;
        self.states
            .lock()
            .unwrap()
            .get(target)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no such element: {}", target))
    }

    async fn scroll_into_view(&self, target: &ElementTarget) -> Result<()> {
        self.record(format!("scroll:{target}"))
    }

    async fn click(&self, target: &ElementTarget) -> Result<()> {
        if let Some(delay) = self.click_delay {
            tokio::time::sleep(delay).await;
        }
        self.record(format!("click:{target}"))
    }

    async fn hover(&self, target: &ElementTarget) -> Result<()> {
        self.record(format!("hover:{target}"))
    }

    async fn focus(&self, target: &ElementTarget) -> Result<()> {
        self.record(format!("focus:{target}"))
    }

    async fn press_escape(&self) -> Result<()> {
        self.record("escape".to_string())
    }

    async fn content(&self) -> Result<String> {
        self.record("content".to_string())?;
        Ok(self.html.lock().unwrap().clone())
    }

    async fn frame_count(&self) -> Result<usize> {
        self.record("frame_count".to_string())?;
        Ok(self.frames.lock().unwrap().len())
    }

    async fn frame_body(&self, index: usize) -> Result<String> {
        self.record(format!("frame_body:{index}"))?;
        match self.frames.lock().unwrap().get(index) {
            Some(Ok(body)) => Ok(body.clone()),
            Some(Err(message)) => anyhow::bail!("{}", message),
            None => anyhow::bail!("no such frame {}", index),
        }
    }

    async fn close(&self) -> Result<()> {
        self.record("close".to_string())
    }
}
