use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ErrorCategory;

/// How a candidate element should be activated
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionType {
    #[default]
    Click,
    Hover,
    Focus,
    Scroll,
}

impl InteractionType {
    pub fn as_str(self) -> &'static str {
        match self {
            InteractionType::Click => "click",
            InteractionType::Hover => "hover",
            InteractionType::Focus => "focus",
            InteractionType::Scroll => "scroll",
        }
    }
}

impl std::str::FromStr for InteractionType {
    type Err = anyhow::Error;

    /// Parse interaction type from string (case-insensitive)
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "click" | "tap" => Ok(InteractionType::Click),
            "hover" | "mouseover" => Ok(InteractionType::Hover),
            "focus" => Ok(InteractionType::Focus),
            "scroll" | "scrollintoview" => Ok(InteractionType::Scroll),
            _ => anyhow::bail!("Unsupported interaction type: {}", s),
        }
    }
}

/// An element proposed by content analysis as worth activating
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateElement {
    /// CSS selector for the element on the live page
    pub selector: String,
    /// Visible text of the element as seen by the model
    pub text_content: String,
    pub interaction_type: InteractionType,
    /// Why the model thinks this element hides content
    pub reason: String,
}

/// Kind of DOM change observed after an interaction
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeType {
    ElementAdded,
    NewlyVisibleElement,
    AttributeChanged,
}

impl ChangeType {
    /// Higher ranks are preferred when choosing which change a candidate revealed
    pub fn rank(self) -> u8 {
        match self {
            ChangeType::ElementAdded => 3,
            ChangeType::NewlyVisibleElement => 2,
            ChangeType::AttributeChanged => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChangeType::ElementAdded => "elementAdded",
            ChangeType::NewlyVisibleElement => "newlyVisibleElement",
            ChangeType::AttributeChanged => "attributeChanged",
        }
    }
}

/// Element bounding box in CSS pixels
#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// Reproducible address of a DOM node
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Locator {
    /// Resolves to exactly one node in the document it was built against
    pub xpath: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub css_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<Rect>,
}

/// A change recorded by the change tracker during one interaction window
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedChange {
    pub change_type: ChangeType,
    pub locator: Locator,
    pub timestamp: DateTime<Utc>,
    /// Outer HTML of the changed node at drain time
    pub html: String,
    /// Length of the node's trimmed text content
    pub text_length: usize,
}

impl ObservedChange {
    /// Pick the change that best represents what an interaction revealed:
    /// highest change-type rank, then the most text. Earlier changes win ties.
    pub fn best(changes: &[ObservedChange]) -> Option<&ObservedChange> {
        let mut best: Option<&ObservedChange> = None;
        for change in changes {
            let better = match best {
                None => true,
                Some(current) => {
                    (change.change_type.rank(), change.text_length)
                        > (current.change_type.rank(), current.text_length)
                }
            };
            if better {
                best = Some(change);
            }
        }
        best
    }
}

/// Diagnostic data carried along with a revealed fragment
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevealMetadata {
    pub reason: String,
    pub candidate_text: String,
    pub text_length: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_at: Option<DateTime<Utc>>,
}

/// Content fragment plus placement data produced by one successful interaction
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevealedContentItem {
    pub selector: String,
    pub element_index: usize,
    pub interaction_type: InteractionType,
    pub change_type: ChangeType,
    #[serde(rename = "revealedHTML")]
    pub revealed_html: String,
    pub position: Locator,
    pub metadata: RevealMetadata,
}

impl RevealedContentItem {
    /// Pair a candidate's interaction with the change it caused
    pub fn from_change(
        candidate: &CandidateElement,
        element_index: usize,
        change: &ObservedChange,
    ) -> Self {
        Self {
            selector: candidate.selector.clone(),
            element_index,
            interaction_type: candidate.interaction_type,
            change_type: change.change_type,
            revealed_html: change.html.clone(),
            position: change.locator.clone(),
            metadata: RevealMetadata {
                reason: candidate.reason.clone(),
                candidate_text: candidate.text_content.clone(),
                text_length: change.text_length,
                observed_at: Some(change.timestamp),
            },
        }
    }
}

/// Scraping path
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ScrapeMode {
    /// Static extraction only
    #[default]
    Normal,
    /// Model-driven discovery of interactive elements before extraction
    Beast,
}

/// One scrape to perform
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ScrapeRequest {
    pub url: String,
    #[serde(default)]
    pub mode: ScrapeMode,
    /// What the caller is looking for; steers element discovery
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

impl ScrapeRequest {
    pub fn new(url: impl Into<String>, mode: ScrapeMode) -> Self {
        Self {
            url: url.into(),
            mode,
            query: None,
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }
}

/// Session phases in the order they run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Init,
    Navigate,
    Stabilize,
    IframeInline,
    Extract,
    DiscoverElements,
    InteractLoop,
    Combine,
    Convert,
    Done,
    Failed,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Init => "init",
            Phase::Navigate => "navigate",
            Phase::Stabilize => "stabilize",
            Phase::IframeInline => "iframe-inline",
            Phase::Extract => "extract",
            Phase::DiscoverElements => "discover-elements",
            Phase::InteractLoop => "interact-loop",
            Phase::Combine => "combine",
            Phase::Convert => "convert",
            Phase::Done => "done",
            Phase::Failed => "failed",
        }
    }
}

/// Entry in a session's phase log
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PhaseRecord {
    pub attempt: u32,
    pub phase: Phase,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Whether the caller got what it asked for
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrapeOutcome {
    /// Content extracted with no caveats
    Success,
    /// Content extracted, but `enhanced_error` explains what was lost
    Partial,
    /// No content
    Failed,
}

/// Final error surfaced on hard failure
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FailureInfo {
    pub category: ErrorCategory,
    pub message: String,
}

/// Structured result of one scraping session
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ScrapeResult {
    pub outcome: ScrapeOutcome,
    pub url: String,
    pub mode: ScrapeMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub markdown: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    pub revealed_count: usize,
    pub attempts: u32,
    pub phase_log: Vec<PhaseRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enhanced_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureInfo>,
}

impl ScrapeResult {
    pub fn is_success(&self) -> bool {
        self.outcome == ScrapeOutcome::Success
    }

    /// True when some content came back, with or without caveats
    pub fn has_content(&self) -> bool {
        self.outcome != ScrapeOutcome::Failed
    }
}

/// Notable events emitted to a progress sink
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ProgressEvent {
    PhaseStarted { attempt: u32, phase: Phase },
    CandidatesDiscovered { count: usize },
    CandidateStarted { index: usize, total: usize, selector: String },
    CandidateSkipped { selector: String, reason: String },
    ContentRevealed { selector: String, change_type: ChangeType },
    OverlaysDismissed { count: usize },
    RetryScheduled { attempt: u32, delay_ms: u64, category: ErrorCategory },
    Finished { outcome: ScrapeOutcome },
}

/// Browser viewport dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewportSize {
    /// Viewport width in pixels
    pub width: u32,
    /// Viewport height in pixels
    pub height: u32,
}

impl ViewportSize {
    /// Parse viewport size from "WIDTHxHEIGHT" format (e.g., "1920x1080")
    pub fn parse(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('x').collect();
        if parts.len() != 2 {
            anyhow::bail!("Invalid viewport format. Use WIDTHxHEIGHT (e.g., 1920x1080)");
        }

        let width = parts[0]
            .parse::<u32>()
            .map_err(|_| anyhow::anyhow!("Invalid width in viewport size"))?;
        let height = parts[1]
            .parse::<u32>()
            .map_err(|_| anyhow::anyhow!("Invalid height in viewport size"))?;

        Ok(ViewportSize { width, height })
    }
}

impl Default for ViewportSize {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

#[cfg(test)]
#[path = "types_test.rs"]
mod types_test;
