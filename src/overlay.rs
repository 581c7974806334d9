//! Modal and overlay detection and dismissal.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::page::{ElementTarget, PageDriver};
use crate::types::Rect;

/// Overlays must cover at least this share of the viewport
pub const MIN_VIEWPORT_FRACTION: f64 = 0.02;
/// ...and be at least this many pixels in both dimensions
pub const MIN_OVERLAY_PX: f64 = 50.0;

/// Pause after each dismissal strategy before re-checking visibility
const STRATEGY_SETTLE: Duration = Duration::from_millis(300);

const SCAN_SCRIPT: &str = r#"/* pagesift:overlay-scan */
const selectors = 'div, section, aside, form, dialog, [role="dialog"], [role="alertdialog"], [aria-modal="true"]';
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
const scan = [];
const candidates = [];
for (const el of document.querySelectorAll(selectors)) {
    const style = window.getComputedStyle(el);
    const isDialog = el.tagName === 'DIALOG'
        || el.getAttribute('role') === 'dialog'
        || el.getAttribute('role') === 'alertdialog'
        || el.getAttribute('aria-modal') === 'true';
    if (!isDialog && style.position !== 'fixed' && style.position !== 'absolute') continue;
    const rect = el.getBoundingClientRect();
    const visible = style.display !== 'none'
        && style.visibility !== 'hidden'
        && parseFloat(style.opacity || '1') > 0;
    scan.push(el);
    candidates.push({
        index: scan.length - 1,
        tag: el.tagName.toLowerCase(),
        cssPath: cssPathOf(el),
        isDialog,
        open: el.tagName === 'DIALOG' ? el.open : isDialog,
        visible,
        zIndex: style.zIndex,
        position: style.position,
        rect: { x: rect.x, y: rect.y, width: rect.width, height: rect.height }
    });
}
window.__pagesift_overlay_scan = scan;
return {
    viewport: { width: window.innerWidth, height: window.innerHeight },
    candidates
};
"#;

const RESOLVE_TARGETS: &str = r#"
const scan = window.__pagesift_overlay_scan || [];
const resolve = (t) => {
    const el = scan[t.index];
    if (el && el.isConnected) return el;
    return document.querySelector(t.cssPath);
};
"#;

const VISIBILITY_SCRIPT: &str = r#"/* pagesift:overlay-visibility */
__RESOLVE__
return arguments[0].map(t => {
    const el = resolve(t);
    if (!el || !el.isConnected) return false;
    const style = window.getComputedStyle(el);
    if (el.tagName === 'DIALOG' && !el.open) return false;
    const rect = el.getBoundingClientRect();
    return style.display !== 'none'
        && style.visibility !== 'hidden'
        && parseFloat(style.opacity || '1') > 0
        && rect.width > 0 && rect.height > 0;
});
"#;

const CLICK_OUTSIDE_SCRIPT: &str = r#"/* pagesift:overlay-click-outside */
const target = document.documentElement;
const init = { bubbles: true, cancelable: true, view: window, clientX: 1, clientY: 1 };
target.dispatchEvent(new MouseEvent('mousedown', init));
target.dispatchEvent(new MouseEvent('mouseup', init));
target.dispatchEvent(new MouseEvent('click', init));
return true;
"#;

const CLOSE_CONTROLS_SCRIPT: &str = r#"/* pagesift:overlay-close-controls */
__RESOLVE__
const words = ['close', 'cancel', 'dismiss', '×', 'x', '✕', '✖'];
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
const found = [];
for (const t of arguments[0]) {
    const overlay = resolve(t);
    if (!overlay) continue;
    for (const el of overlay.querySelectorAll('button, a, [role="button"], [aria-label], [title], span, div')) {
        const label = (el.getAttribute('aria-label') || el.getAttribute('title') || '').trim().toLowerCase();
        const text = (el.innerText || el.textContent || '').trim().toLowerCase();
        const labelled = label && (label.includes('close') || label.includes('dismiss') || label.includes('cancel'));
        const shortText = text.length <= 10 && words.includes(text);
        if (labelled || shortText) {
            const path = cssPathOf(el);
            if (!found.includes(path)) found.push(path);
        }
    }
}
return found;
"#;

const FORCE_HIDE_SCRIPT: &str = r#"/* pagesift:overlay-force-hide */
__RESOLVE__
let hidden = 0;
for (const t of arguments[0]) {
    const el = resolve(t);
    if (!el) continue;
    if (el.tagName === 'DIALOG' && el.open) {
        try { el.close(); } catch (e) {}
    }
    el.style.setProperty('display', 'none', 'important');
    el.style.setProperty('visibility', 'hidden', 'important');
    hidden += 1;
}
for (const root of [document.documentElement, document.body]) {
    if (root && window.getComputedStyle(root).overflow === 'hidden') {
        root.style.setProperty('overflow', 'auto', 'important');
    }
}
return hidden;
"#;

const SCROLL_BLOCKED_SCRIPT: &str = r#"/* pagesift:scroll-blocked */
const blocked = (el) => {
    if (!el) return false;
    const style = window.getComputedStyle(el);
    return style.overflow === 'hidden' || style.overflowY === 'hidden';
};
const body = document.body;
return blocked(document.documentElement)
    || blocked(body)
    || (body && window.getComputedStyle(body).position === 'fixed');
"#;

fn with_resolver(script: &str) -> String {
    script.replace("__RESOLVE__", RESOLVE_TARGETS)
}

/// How an overlay was recognized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayKind {
    /// Open native dialog or ARIA dialog
    Dialog,
    /// Positioned container stacked above the page
    Positioned,
}

/// A blocking element found on the page
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    /// Position in the page's most recent scan
    pub scan_index: usize,
    pub css_path: String,
    pub tag: String,
    pub kind: OverlayKind,
    pub rect: Rect,
}

impl Overlay {
    fn target_json(&self) -> Value {
        json!({ "index": self.scan_index, "cssPath": self.css_path })
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

/// Element reported by the scan, before classification
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayCandidate {
    pub index: usize,
    pub tag: String,
    pub css_path: String,
    pub is_dialog: bool,
    pub open: bool,
    pub visible: bool,
    /// Computed `z-index`, possibly `auto`
    pub z_index: String,
    pub position: String,
    pub rect: Rect,
}

#[derive(Debug, Deserialize)]
struct ScanResult {
    viewport: Viewport,
    candidates: Vec<OverlayCandidate>,
}

/// Apply the overlay rule to one scanned element. Either an open visible
/// dialog, or a fixed/absolute element with z-index above 1; in both cases
/// it must cover a minimum share of the viewport and a minimum pixel size.
pub fn classify_overlay(candidate: &OverlayCandidate, viewport: Viewport) -> Option<OverlayKind> {
    if !candidate.visible {
        return None;
    }
    let viewport_area = viewport.width.max(1.0) * viewport.height.max(1.0);
    let large_enough = candidate.rect.area() / viewport_area >= MIN_VIEWPORT_FRACTION
        && candidate.rect.width >= MIN_OVERLAY_PX
        && candidate.rect.height >= MIN_OVERLAY_PX;
    if !large_enough {
        return None;
    }

    if candidate.is_dialog && candidate.open {
        return Some(OverlayKind::Dialog);
    }
    let z_index = candidate.z_index.trim().parse::<i64>().unwrap_or(0);
    let positioned = matches!(candidate.position.as_str(), "fixed" | "absolute");
    (z_index > 1 && positioned).then_some(OverlayKind::Positioned)
}

/// Scan the page for blocking overlays
pub async fn find_overlays(page: &dyn PageDriver) -> Result<Vec<Overlay>> {
    let value = page
        .evaluate(SCAN_SCRIPT, vec![])
        .await
        .context("Overlay scan failed")?;
    let scan: ScanResult = serde_json::from_value(value).context("Unexpected overlay scan payload")?;

    let overlays: Vec<Overlay> = scan
        .candidates
        .into_iter()
        .filter_map(|candidate| {
            let kind = classify_overlay(&candidate, scan.viewport)?;
            Some(Overlay {
                scan_index: candidate.index,
                css_path: candidate.css_path,
                tag: candidate.tag,
                kind,
                rect: candidate.rect,
            })
        })
        .collect();
    debug!("Found {} overlay(s)", overlays.len());
    Ok(overlays)
}

/// Whether the page has disabled scrolling, as modals usually do
pub async fn is_scrolling_blocked(page: &dyn PageDriver) -> Result<bool> {
    let value = page
        .evaluate(SCROLL_BLOCKED_SCRIPT, vec![])
        .await
        .context("Scroll state check failed")?;
    Ok(value.as_bool().unwrap_or(false))
}

/// Dismissal strategies, in the order they are tried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DismissStrategy {
    ClickOutside,
    Escape,
    CloseControl,
    ForceHide,
}

impl DismissStrategy {
    pub const ORDER: [DismissStrategy; 4] = [
        DismissStrategy::ClickOutside,
        DismissStrategy::Escape,
        DismissStrategy::CloseControl,
        DismissStrategy::ForceHide,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DismissStrategy::ClickOutside => "click-outside",
            DismissStrategy::Escape => "escape",
            DismissStrategy::CloseControl => "close-control",
            DismissStrategy::ForceHide => "force-hide",
        }
    }
}

async fn visibility(page: &dyn PageDriver, targets: &[Value]) -> Result<Vec<bool>> {
    let value = page
        .evaluate(&with_resolver(VISIBILITY_SCRIPT), vec![Value::Array(targets.to_vec())])
        .await?;
    let snapshot: Vec<bool> =
        serde_json::from_value(value).context("Unexpected overlay visibility payload")?;
    if snapshot.len() != targets.len() {
        anyhow::bail!(
            "visibility reported for {} of {} overlays",
            snapshot.len(),
            targets.len()
        );
    }
    Ok(snapshot)
}

async fn apply(page: &dyn PageDriver, strategy: DismissStrategy, targets: &[Value]) -> Result<()> {
    match strategy {
        DismissStrategy::ClickOutside => {
            page.evaluate(CLICK_OUTSIDE_SCRIPT, vec![]).await?;
        }
        DismissStrategy::Escape => page.press_escape().await?,
        DismissStrategy::CloseControl => {
            let value = page
                .evaluate(&with_resolver(CLOSE_CONTROLS_SCRIPT), vec![Value::Array(targets.to_vec())])
                .await?;
            let controls: Vec<String> = serde_json::from_value(value).unwrap_or_default();
            if controls.is_empty() {
                anyhow::bail!("no close control found");
            }
            for selector in controls {
                if let Err(e) = page.click(&ElementTarget::new(selector.as_str(), 0)).await {
                    debug!("Close control {} not clickable: {}", selector, e);
                }
            }
        }
        DismissStrategy::ForceHide => {
            page.evaluate(&with_resolver(FORCE_HIDE_SCRIPT), vec![Value::Array(targets.to_vec())])
                .await?;
        }
    }
    Ok(())
}

/// Try each strategy once, in order, until one changes the visibility of
/// at least one overlay. Returns whether any strategy succeeded. A strategy
/// whose effect cannot be measured is applied but never counts as success.
pub async fn dismiss(page: &dyn PageDriver, overlays: &[Overlay]) -> bool {
    if overlays.is_empty() {
        return false;
    }
    let targets: Vec<Value> = overlays.iter().map(Overlay::target_json).collect();

    for strategy in DismissStrategy::ORDER {
        let before = match visibility(page, &targets).await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!("Overlay visibility check failed: {:#}", e);
                None
            }
        };

        if let Err(e) = apply(page, strategy, &targets).await {
            debug!("Dismiss strategy {} failed: {}", strategy.as_str(), e);
            continue;
        }
        tokio::time::sleep(STRATEGY_SETTLE).await;

        let Some(before) = before else {
            debug!("Dismiss strategy {} applied unverified", strategy.as_str());
            continue;
        };

        let after = match visibility(page, &targets).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Overlay visibility check failed: {:#}", e);
                continue;
            }
        };
        if before != after {
            info!(
                "Dismissed {} overlay(s) with {}",
                overlays.len(),
                strategy.as_str()
            );
            return true;
        }
        debug!("Dismiss strategy {} changed nothing", strategy.as_str());
    }
    false
}

#[cfg(test)]
#[path = "overlay_test.rs"]
mod overlay_test;
