//! DOM change tracking around a single interaction.
//!
//! [`attach`] installs a mutation observer on the page body and returns a
//! [`TrackerHandle`]; the handle must be passed to [`drain_changes`] and
//! [`detach`]. Attaching again tears down every earlier harness, so changes
//! are only ever attributed to the most recent interaction.
//!
//! The page records raw changes with a positional path, a CSS path and the
//! element's tag and id. Draining resolves them against a fresh snapshot,
//! rejecting any node whose tag or id disagrees with what was recorded (the
//! parser may restructure markup that scripts built), and builds a verified
//! [`Locator`]. No live node references outlive the drain.

use std::collections::HashSet;

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::dom::{Document, NodeId};
use crate::locator::{LocatorResolver, node_at_path};
use crate::page::PageDriver;
use crate::query::select_css;
use crate::types::{ChangeType, ObservedChange, Rect};

const ATTACH_SCRIPT: &str = r#"/* pagesift:tracker-attach */
const token = arguments[0];
const prefix = '__pagesift_tracker_';
for (const key of Object.keys(window)) {
    if (key.startsWith(prefix)) {
        try { window[key].observer.disconnect(); } catch (e) {}
        delete window[key];
    }
}
if (!document.body) return false;

const isVisible = (el) => {
    if (!el.isConnected) return false;
    const style = window.getComputedStyle(el);
    if (style.display === 'none' || style.visibility === 'hidden') return false;
    if (parseFloat(style.opacity || '1') === 0) return false;
    const rect = el.getBoundingClientRect();
    return rect.width > 0 || rect.height > 0;
};
const pathOf = (el) => {
    const path = [];
    let node = el;
    while (node && node.nodeType === 1 && node.parentNode) {
        path.unshift(Array.prototype.indexOf.call(node.parentNode.children, node) + 1);
        node = node.parentNode;
    }
    return path;
};
const cssPathOf = (el) => {
    const parts = [];
    let node = el;
    while (node && node.nodeType === 1) {
        const tag = node.tagName.toLowerCase();
        if (node.id && /^[A-Za-z_][A-Za-z0-9_-]*$/.test(node.id)) {
            parts.unshift(tag + '#' + node.id);
            break;
        }
        const parent = node.parentElement;
        if (parent) {
            const same = Array.from(parent.children).filter(c => c.tagName === node.tagName);
            parts.unshift(same.length > 1 ? tag + ':nth-of-type(' + (same.indexOf(node) + 1) + ')' : tag);
        } else {
            parts.unshift(tag);
        }
        node = parent;
    }
    return parts.join(' > ');
};

const hidden = new WeakSet();
document.body.querySelectorAll('*').forEach(el => { if (!isVisible(el)) hidden.add(el); });

const harness = { records: [], observer: null, process: null };
const record = (changeType, el) => {
    if (harness.records.length >= 500) return;
    const rect = el.getBoundingClientRect();
    harness.records.push({
        changeType,
        tag: el.tagName.toLowerCase(),
        id: el.id || null,
        path: pathOf(el),
        cssPath: cssPathOf(el),
        rect: { x: rect.x, y: rect.y, width: rect.width, height: rect.height },
        timestamp: Date.now()
    });
};

harness.process = (mutations) => {
    for (const m of mutations) {
        if (m.type === 'childList') {
            m.addedNodes.forEach(n => { if (n.nodeType === 1) record('elementAdded', n); });
        } else if (m.type === 'attributes' && m.target.nodeType === 1) {
            const el = m.target;
            const visible = isVisible(el);
            if (hidden.has(el) && visible) {
                hidden.delete(el);
                record('newlyVisibleElement', el);
            } else if (!visible) {
                hidden.add(el);
            } else {
                record('attributeChanged', el);
            }
        }
    }
};
harness.observer = new MutationObserver(harness.process);
harness.observer.observe(document.body, {
    childList: true,
    subtree: true,
    attributes: true,
    attributeFilter: ['style', 'class', 'hidden']
});
window[prefix + token] = harness;
return true;
"#;

const DRAIN_SCRIPT: &str = r#"/* pagesift:tracker-drain */
const harness = window['__pagesift_tracker_' + arguments[0]];
if (!harness) return null;
harness.process(harness.observer.takeRecords());
return harness.records.splice(0);
"#;

const DETACH_SCRIPT: &str = r#"/* pagesift:tracker-detach */
const key = '__pagesift_tracker_' + arguments[0];
const harness = window[key];
if (!harness) return false;
harness.observer.disconnect();
delete window[key];
return true;
"#;

/// Proof of an attached tracker; required to drain or detach it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerHandle {
    token: String,
}

impl TrackerHandle {
    pub fn token(&self) -> &str {
        &self.token
    }
}

/// Change as recorded in the page, before resolution
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawChange {
    change_type: ChangeType,
    #[serde(default)]
    tag: Option<String>,
    #[serde(default)]
    id: Option<String>,
    path: Vec<usize>,
    #[serde(default)]
    css_path: Option<String>,
    #[serde(default)]
    rect: Option<Rect>,
    /// Milliseconds since the epoch
    timestamp: f64,
}

/// Install a fresh mutation-observation harness, replacing any earlier one
pub async fn attach(page: &dyn PageDriver) -> Result<TrackerHandle> {
    let token = uuid::Uuid::new_v4().simple().to_string();
    let installed = page
        .evaluate(ATTACH_SCRIPT, vec![json!(token)])
        .await
        .context("Failed to install change tracker")?;
    if installed != Value::Bool(true) {
        anyhow::bail!("Change tracker not installed: document has no body");
    }
    debug!("Change tracker {} attached", token);
    Ok(TrackerHandle { token })
}

/// Return and clear everything observed since attach or the previous drain
pub async fn drain_changes(page: &dyn PageDriver, handle: &TrackerHandle) -> Result<Vec<ObservedChange>> {
    let value = page
        .evaluate(DRAIN_SCRIPT, vec![json!(handle.token)])
        .await
        .context("Failed to drain change tracker")?;
    if value.is_null() {
        debug!("Change tracker {} is gone (page navigated?)", handle.token);
        return Ok(Vec::new());
    }
    let raw: Vec<RawChange> =
        serde_json::from_value(value).context("Unexpected change tracker payload")?;
    if raw.is_empty() {
        return Ok(Vec::new());
    }

    let snapshot = page.content().await?;
    let doc = Document::parse(&snapshot);
    Ok(resolve_changes(&doc, raw))
}

/// Tear the harness down
pub async fn detach(page: &dyn PageDriver, handle: TrackerHandle) -> Result<()> {
    page.evaluate(DETACH_SCRIPT, vec![json!(handle.token)])
        .await
        .context("Failed to detach change tracker")?;
    debug!("Change tracker {} detached", handle.token);
    Ok(())
}

impl RawChange {
    /// The snapshot node carries the tag and id the page recorded
    fn identifies(&self, doc: &Document, node: NodeId) -> bool {
        let tag_matches = self
            .tag
            .as_deref()
            .is_none_or(|tag| doc.tag(node) == Some(tag));
        let id_matches = self
            .id
            .as_deref()
            .is_none_or(|id| doc.attr(node, "id") == Some(id));
        tag_matches && id_matches
    }
}

fn locate_raw(doc: &Document, raw: &RawChange) -> Option<NodeId> {
    if let Some(node) = node_at_path(doc, &raw.path) {
        if raw.identifies(doc, node) {
            return Some(node);
        }
        debug!(
            "Path {:?} leads to <{}>, expected <{}>",
            raw.path,
            doc.tag(node).unwrap_or("?"),
            raw.tag.as_deref().unwrap_or("?")
        );
    }
    let css = raw.css_path.as_deref()?;
    match select_css(doc, css).as_deref() {
        Ok([only]) if raw.identifies(doc, *only) => Some(*only),
        _ => None,
    }
}

fn resolve_changes(doc: &Document, raw: Vec<RawChange>) -> Vec<ObservedChange> {
    let resolver = LocatorResolver::new(doc);
    let mut seen: HashSet<(NodeId, ChangeType)> = HashSet::new();
    let mut changes = Vec::new();

    for change in raw {
        let Some(node) = locate_raw(doc, &change) else {
            debug!("Dropping {} change at {:?}: not in snapshot", change.change_type.as_str(), change.path);
            continue;
        };
        if !seen.insert((node, change.change_type)) {
            continue;
        }
        let Some(locator) = resolver.locate(node, change.rect) else {
            continue;
        };
        let timestamp = Utc
            .timestamp_millis_opt(change.timestamp as i64)
            .single()
            .unwrap_or_else(Utc::now);
        changes.push(ObservedChange {
            change_type: change.change_type,
            locator,
            timestamp,
            html: doc.outer_html(node),
            text_length: doc.text_content(node).trim().chars().count(),
        });
    }
    changes
}

#[cfg(test)]
#[path = "tracker_test.rs"]
mod tracker_test;
