//! Performs one interaction on a candidate element.
//!
//! Failures never propagate: a candidate that cannot be activated is
//! skipped with a [`SkipReason`] for diagnostics.

use std::fmt;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::TimeoutConfig;
use crate::dom::normalize_space;
use crate::page::{ElementTarget, PageDriver};
use crate::types::{CandidateElement, InteractionType};

/// Why a candidate was skipped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NotFound,
    NotVisible,
    Disabled,
    Timeout,
    /// Element left the DOM between lookup and action
    Detached,
    /// Another element (usually an overlay) would receive the click
    Intercepted,
    Other(String),
}

impl SkipReason {
    /// Map a driver error message onto a reason
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("intercepted") || lower.contains("would receive the click") {
            SkipReason::Intercepted
        } else if lower.contains("stale element")
            || lower.contains("detached")
            || lower.contains("not attached")
        {
            SkipReason::Detached
        } else if lower.contains("timed out") || lower.contains("timeout") {
            SkipReason::Timeout
        } else if lower.contains("disabled") {
            SkipReason::Disabled
        } else if lower.contains("not interactable") || lower.contains("not visible") {
            SkipReason::NotVisible
        } else if lower.contains("no such element") || lower.contains("out of bounds") {
            SkipReason::NotFound
        } else {
            SkipReason::Other(message.to_string())
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NotFound => write!(f, "element not found"),
            SkipReason::NotVisible => write!(f, "element not visible"),
            SkipReason::Disabled => write!(f, "element disabled"),
            SkipReason::Timeout => write!(f, "interaction timed out"),
            SkipReason::Detached => write!(f, "element detached from DOM"),
            SkipReason::Intercepted => write!(f, "click intercepted by another element"),
            SkipReason::Other(message) => write!(f, "{}", message),
        }
    }
}

pub struct InteractionExecutor {
    action_timeout: Duration,
    settle: Duration,
}

impl InteractionExecutor {
    pub fn new(action_timeout: Duration, settle: Duration) -> Self {
        Self {
            action_timeout,
            settle,
        }
    }

    pub fn from_config(timeouts: &TimeoutConfig) -> Self {
        Self::new(timeouts.interaction(), timeouts.settle())
    }

    /// Pick which match of the candidate's selector to act on: the first
    /// whose text equals the candidate's text, then the first containing
    /// it, else the first match.
    pub async fn resolve_target(
        &self,
        page: &dyn PageDriver,
        candidate: &CandidateElement,
    ) -> Result<ElementTarget, SkipReason> {
        let texts = page
            .element_texts(&candidate.selector)
            .await
            .map_err(|e| SkipReason::classify(&e.to_string()))?;
        if texts.is_empty() {
            return Err(SkipReason::NotFound);
        }

        let wanted = normalize_space(&candidate.text_content).to_lowercase();
        let normalized: Vec<String> = texts
            .iter()
            .map(|text| normalize_space(text).to_lowercase())
            .collect();
        let index = if wanted.is_empty() {
            0
        } else {
            normalized
                .iter()
                .position(|text| *text == wanted)
                .or_else(|| normalized.iter().position(|text| text.contains(&wanted)))
                .unwrap_or(0)
        };
        if texts.len() > 1 {
            debug!(
                "{} elements match '{}', using index {}",
                texts.len(),
                candidate.selector,
                index
            );
        }
        Ok(ElementTarget::new(candidate.selector.as_str(), index))
    }

    /// Perform the interaction; false when the candidate was skipped
    pub async fn perform(
        &self,
        page: &dyn PageDriver,
        target: &ElementTarget,
        interaction_type: InteractionType,
    ) -> bool {
        match self.attempt(page, target, interaction_type).await {
            Ok(()) => true,
            Err(reason) => {
                warn!(
                    "Skipping {} on {}: {}",
                    interaction_type.as_str(),
                    target,
                    reason
                );
                false
            }
        }
    }

    /// Like [`perform`](Self::perform) but reports why the candidate was skipped
    pub async fn attempt(
        &self,
        page: &dyn PageDriver,
        target: &ElementTarget,
        interaction_type: InteractionType,
    ) -> Result<(), SkipReason> {
        let state = self.bounded(page.element_state(target)).await?;
        if !state.visible {
            return Err(SkipReason::NotVisible);
        }
        if !state.enabled {
            return Err(SkipReason::Disabled);
        }

        self.bounded(page.scroll_into_view(target)).await?;
        match interaction_type {
            InteractionType::Click => self.bounded(page.click(target)).await?,
            InteractionType::Hover => self.bounded(page.hover(target)).await?,
            InteractionType::Focus => self.bounded(page.focus(target)).await?,
            InteractionType::Scroll => {}
        }

        debug!("{} on {} done, settling", interaction_type.as_str(), target);
        tokio::time::sleep(self.settle).await;
        Ok(())
    }

    async fn bounded<T, F>(&self, action: F) -> Result<T, SkipReason>
    where
        F: std::future::Future<Output = anyhow::Result<T>>,
    {
        match tokio::time::timeout(self.action_timeout, action).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(SkipReason::classify(&format!("{:#}", e))),
            Err(_) => Err(SkipReason::Timeout),
        }
    }
}

#[cfg(test)]
#[path = "interaction_test.rs"]
mod interaction_test;
