//! Content-understanding collaborator.
//!
//! Given a reduced DOM snapshot, a model decides whether interaction is
//! needed and proposes candidate elements. Responses are validated here so
//! the rest of the crate only ever sees well-formed [`CandidateElement`]s.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::config::ModelConfig;
use crate::errors::ErrorCategory;
use crate::types::{CandidateElement, InteractionType};

/// Model verdict on whether the page hides content behind interaction
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InteractionNeeded {
    Yes,
    No,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResponse {
    pub interaction_needed: InteractionNeeded,
    pub analysis: String,
    pub elements: Vec<CandidateElement>,
}

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("Model API key is not configured")]
    MissingApiKey,
    #[error("Model API rate limit exceeded: {0}")]
    RateLimited(String),
    #[error("Model API request failed with status {status}: {message}")]
    Http { status: u16, message: String },
    #[error("Model API transport error: {0}")]
    Transport(String),
    #[error("Model API request timed out")]
    Timeout,
    #[error("Unusable model response: {0}")]
    Unparseable(String),
}

impl AnalysisError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            AnalysisError::RateLimited(_) => ErrorCategory::RateLimit,
            AnalysisError::Transport(_) => ErrorCategory::Network,
            AnalysisError::Timeout => ErrorCategory::Timeout,
            AnalysisError::MissingApiKey
            | AnalysisError::Http { .. }
            | AnalysisError::Unparseable(_) => ErrorCategory::AiService,
        }
    }
}

#[async_trait]
pub trait ContentAnalyzer: Send + Sync {
    async fn analyze(
        &self,
        snapshot: &str,
        query: Option<&str>,
    ) -> Result<AnalysisResponse, AnalysisError>;
}

/// Lenient wire shape; validated into [`AnalysisResponse`]
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawResponse {
    interaction_needed: Value,
    #[serde(default)]
    analysis: Option<String>,
    #[serde(default)]
    elements: Vec<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCandidate {
    selector: Option<String>,
    #[serde(default, alias = "text")]
    text_content: Option<String>,
    #[serde(default)]
    interaction_type: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

impl AnalysisResponse {
    /// Parse model output. Accepts a JSON object (optionally inside a code
    /// fence or surrounded by prose) or a bare `YES`/`NO`, which yields an
    /// empty element list. Malformed candidates are dropped.
    pub fn parse(text: &str) -> Result<Self, AnalysisError> {
        let trimmed = strip_code_fence(text.trim());
        if let Some(raw) = parse_object(trimmed) {
            return Self::from_raw(raw);
        }

        let word: String = trimmed
            .chars()
            .take_while(char::is_ascii_alphabetic)
            .collect::<String>()
            .to_uppercase();
        let verdict = match word.as_str() {
            "YES" => InteractionNeeded::Yes,
            "NO" => InteractionNeeded::No,
            _ => return Err(AnalysisError::Unparseable(truncate(trimmed, 200))),
        };
        debug!("Model answered in plain text, treating as {:?}", verdict);
        Ok(Self {
            interaction_needed: verdict,
            analysis: trimmed.to_string(),
            elements: Vec::new(),
        })
    }

    fn from_raw(raw: RawResponse) -> Result<Self, AnalysisError> {
        let interaction_needed = match &raw.interaction_needed {
            Value::Bool(true) => InteractionNeeded::Yes,
            Value::Bool(false) => InteractionNeeded::No,
            Value::String(s) if s.trim().eq_ignore_ascii_case("yes") => InteractionNeeded::Yes,
            Value::String(s) if s.trim().eq_ignore_ascii_case("no") => InteractionNeeded::No,
            other => {
                return Err(AnalysisError::Unparseable(format!(
                    "interactionNeeded must be YES or NO, got {}",
                    other
                )));
            }
        };

        let total = raw.elements.len();
        let elements: Vec<CandidateElement> =
            raw.elements.into_iter().filter_map(validate_candidate).collect();
        if elements.len() < total {
            warn!("Dropped {} malformed candidate elements", total - elements.len());
        }

        Ok(Self {
            interaction_needed,
            analysis: raw.analysis.unwrap_or_default(),
            elements,
        })
    }

    /// Candidates worth acting on; none unless the model said YES
    pub fn candidates(&self) -> &[CandidateElement] {
        match self.interaction_needed {
            InteractionNeeded::Yes => &self.elements,
            InteractionNeeded::No => &[],
        }
    }
}

fn validate_candidate(value: Value) -> Option<CandidateElement> {
    let raw: RawCandidate = serde_json::from_value(value).ok()?;
    let selector = raw.selector?.trim().to_string();
    if selector.is_empty() {
        return None;
    }
    let interaction_type = match raw.interaction_type.as_deref() {
        None | Some("") => InteractionType::Click,
        Some(kind) => kind.parse().ok()?,
    };
    Some(CandidateElement {
        selector,
        text_content: raw.text_content.unwrap_or_default().trim().to_string(),
        interaction_type,
        reason: raw.reason.unwrap_or_default(),
    })
}

fn parse_object(text: &str) -> Option<RawResponse> {
    if let Ok(raw) = serde_json::from_str(text) {
        return Some(raw);
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    body.strip_suffix("```").unwrap_or(body).trim()
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((index, _)) => format!("{}...", &text[..index]),
        None => text.to_string(),
    }
}

const SYSTEM_PROMPT: &str = "You analyse simplified HTML of a web page and decide whether \
important content is hidden behind interactive elements such as tabs, accordions, \
\"show more\" buttons, dropdowns or hover menus. Ignore content that is already visible \
in the HTML. Ignore navigation, login, cart, social and cookie controls. Answer with a JSON \
object: {\"interactionNeeded\": \"YES\" or \"NO\", \"analysis\": string, \"elements\": \
[{\"selector\": CSS selector, \"textContent\": visible text of the element, \
\"interactionType\": \"click\" | \"hover\" | \"focus\" | \"scroll\", \"reason\": string}]}.";

/// Chat-completions client for OpenAI-compatible endpoints
pub struct OpenAiAnalyzer {
    client: reqwest::Client,
    config: ModelConfig,
    timeout: Duration,
}

impl OpenAiAnalyzer {
    pub fn new(config: ModelConfig, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            timeout,
        }
    }

    fn build_request(&self, snapshot: &str, query: Option<&str>) -> Value {
        let mut user = String::new();
        if let Some(query) = query.filter(|q| !q.trim().is_empty()) {
            user.push_str("The user is looking for: ");
            user.push_str(query);
            user.push_str("\n\n");
        }
        user.push_str("HTML:\n");
        user.push_str(snapshot);

        json!({
            "model": self.config.model,
            "temperature": self.config.temperature,
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": user}
            ]
        })
    }
}

#[async_trait]
impl ContentAnalyzer for OpenAiAnalyzer {
    async fn analyze(
        &self,
        snapshot: &str,
        query: Option<&str>,
    ) -> Result<AnalysisResponse, AnalysisError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or(AnalysisError::MissingApiKey)?;

        debug!(
            "Requesting content analysis from {} ({} chars)",
            self.config.api_url,
            snapshot.len()
        );
        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(api_key)
            .timeout(self.timeout)
            .json(&self.build_request(snapshot, query))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AnalysisError::Timeout
                } else {
                    AnalysisError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::RateLimited(truncate(&body, 200)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::Http {
                status: status.as_u16(),
                message: truncate(&body, 200),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AnalysisError::Unparseable(e.to_string()))?;
        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| AnalysisError::Unparseable("response has no message content".to_string()))?;
        AnalysisResponse::parse(content)
    }
}

#[cfg(test)]
#[path = "analyzer_test.rs"]
mod analyzer_test;
