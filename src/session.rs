//! Scraping session orchestration.
//!
//! A [`Scraper`] holds the collaborators (browser launcher, content
//! analyzer, Markdown converter, progress sink) and runs one [`Session`]
//! per request:
//!
//! ```text
//! init → navigate → stabilize → iframe-inline
//!      → normal: extract
//!      → beast:  discover-elements → interact-loop → combine
//!      → convert → done
//! ```
//!
//! Every attempt launches its own browser and closes it afterwards,
//! whatever the outcome. Attempts are repeated according to the
//! [`RetryPolicy`].

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::analyzer::{AnalysisError, ContentAnalyzer};
use crate::config::ScrapeConfig;
use crate::dom::Document;
use crate::errors::{ErrorCategory, ScrapeError};
use crate::interaction::InteractionExecutor;
use crate::markdown::{HtmdConverter, MarkdownConverter};
use crate::overlay;
use crate::page::{BrowserLauncher, PageDriver};
use crate::progress::{NoopSink, ProgressSink};
use crate::query;
use crate::reconciler;
use crate::retry::RetryPolicy;
use crate::sanitize;
use crate::stabilize;
use crate::tracker::{self, TrackerHandle};
use crate::types::{
    CandidateElement, FailureInfo, ObservedChange, Phase, PhaseRecord, ProgressEvent,
    RevealedContentItem, ScrapeMode, ScrapeOutcome, ScrapeRequest, ScrapeResult,
};

/// Caveat and failure message for a cancelled session
const CANCELLED: &str = "cancelled";

/// Runs scraping sessions against a set of collaborators
pub struct Scraper {
    config: ScrapeConfig,
    launcher: Arc<dyn BrowserLauncher>,
    analyzer: Arc<dyn ContentAnalyzer>,
    converter: Arc<dyn MarkdownConverter>,
    progress: Arc<dyn ProgressSink>,
    retry: RetryPolicy,
}

impl Scraper {
    pub fn new(
        config: ScrapeConfig,
        launcher: Arc<dyn BrowserLauncher>,
        analyzer: Arc<dyn ContentAnalyzer>,
    ) -> Self {
        let retry = RetryPolicy::from_config(&config.retry);
        Self {
            config,
            launcher,
            analyzer,
            converter: Arc::new(HtmdConverter::default()),
            progress: Arc::new(NoopSink),
            retry,
        }
    }

    pub fn with_converter(mut self, converter: Arc<dyn MarkdownConverter>) -> Self {
        self.converter = converter;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &ScrapeConfig {
        &self.config
    }

    /// Scrape one page. Never fails: problems are reported in the result.
    pub async fn scrape(&self, request: ScrapeRequest, cancel: CancellationToken) -> ScrapeResult {
        info!("Scraping {} in {:?} mode", request.url, request.mode);
        let session = Session {
            scraper: self,
            request: &request,
            cancel: &cancel,
            log: PhaseLog::new(self.progress.clone()),
            armed: Mutex::new(None),
        };

        let session_ref = &session;
        let (result, attempts) = self
            .retry
            .run(
                move |attempt| session_ref.run_attempt(attempt),
                |attempt, delay, category| {
                    self.progress.emit(ProgressEvent::RetryScheduled {
                        attempt,
                        delay_ms: delay.as_millis() as u64,
                        category,
                    })
                },
            )
            .await;

        session.finish(result, attempts)
    }
}

/// Output of one successful attempt
struct AttemptOutput {
    html: String,
    markdown: String,
    revealed_count: usize,
    /// Non-fatal losses that make the result partial
    caveats: Vec<String>,
}

/// Extracted HTML plus what was lost on the way
struct Extraction {
    html: String,
    revealed_count: usize,
    caveats: Vec<String>,
}

impl Extraction {
    fn plain(html: String) -> Self {
        Self {
            html,
            revealed_count: 0,
            caveats: Vec::new(),
        }
    }
}

/// One scrape request in flight
pub struct Session<'a> {
    scraper: &'a Scraper,
    request: &'a ScrapeRequest,
    cancel: &'a CancellationToken,
    log: PhaseLog,
    /// Tracker attached for the candidate in progress
    armed: Mutex<Option<TrackerHandle>>,
}

impl Session<'_> {
    fn config(&self) -> &ScrapeConfig {
        &self.scraper.config
    }

    fn emit(&self, event: ProgressEvent) {
        self.scraper.progress.emit(event);
    }

    fn check_cancelled(&self) -> Result<(), ScrapeError> {
        if self.cancel.is_cancelled() {
            info!("Scrape of {} cancelled", self.request.url);
            return Err(ScrapeError::Cancelled);
        }
        Ok(())
    }

    /// Enter `phase` unless the session has been cancelled
    fn enter(&self, attempt: u32, phase: Phase) -> Result<(), ScrapeError> {
        self.check_cancelled()?;
        self.log.enter(attempt, phase);
        Ok(())
    }

    /// Enter a phase that finishes content already extracted. Cancellation
    /// no longer aborts; it is recorded as a caveat.
    fn enter_wrap_up(&self, attempt: u32, phase: Phase, caveats: &mut Vec<String>) {
        self.note_cancelled(caveats);
        self.log.enter(attempt, phase);
    }

    fn note_cancelled(&self, caveats: &mut Vec<String>) {
        if self.cancel.is_cancelled() && !caveats.iter().any(|c| c == CANCELLED) {
            info!("Scrape of {} cancelled, keeping extracted content", self.request.url);
            caveats.push(CANCELLED.to_string());
        }
    }

    fn armed_slot(&self) -> MutexGuard<'_, Option<TrackerHandle>> {
        self.armed.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn run_attempt(&self, attempt: u32) -> Result<AttemptOutput, ScrapeError> {
        self.enter(attempt, Phase::Init)?;
        let page = self
            .scraper
            .launcher
            .launch()
            .await
            .map_err(|e| ScrapeError::Browser(format!("Failed to launch browser: {:#}", e)))?;

        let result = self.drive(page.as_ref(), attempt).await;

        if let Err(e) = page.close().await {
            warn!("Failed to close browser: {:#}", e);
        }
        if let Err(e) = &result {
            self.log.note(e.to_string());
        }
        result
    }

    async fn drive(&self, page: &dyn PageDriver, attempt: u32) -> Result<AttemptOutput, ScrapeError> {
        let timeouts = &self.config().timeouts;
        let limits = &self.config().limits;
        let url = &self.request.url;

        self.enter(attempt, Phase::Navigate)?;
        match tokio::time::timeout(timeouts.navigation(), page.goto(url)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(ScrapeError::Navigation {
                    url: url.clone(),
                    message: format!("{:#}", e),
                });
            }
            Err(_) => {
                return Err(ScrapeError::Timeout(format!(
                    "navigation to {} exceeded {:?}",
                    url,
                    timeouts.navigation()
                )));
            }
        }

        self.enter(attempt, Phase::Stabilize)?;
        if !page.wait_for_load(timeouts.navigation()).await? {
            warn!("{} did not finish loading, continuing", url);
        }
        let rounds = stabilize::scroll_until_stable(
            page,
            limits.max_scroll_rounds,
            std::time::Duration::from_millis(limits.scroll_pause),
        )
        .await?;
        self.log.note(format!("{} scroll round(s)", rounds));

        self.enter(attempt, Phase::IframeInline)?;
        match stabilize::inline_frames(page, timeouts.frame_load()).await {
            Ok(count) => self.log.note(format!("{} iframe(s) inlined", count)),
            Err(e) => warn!("Iframe inlining failed, continuing: {:#}", e),
        }

        let mut extraction = match self.request.mode {
            ScrapeMode::Normal => self.extract(page, attempt).await?,
            ScrapeMode::Beast => self.discover_and_interact(page, attempt).await?,
        };

        self.enter_wrap_up(attempt, Phase::Convert, &mut extraction.caveats);
        let markdown = self
            .scraper
            .converter
            .convert(&extraction.html)
            .map_err(ScrapeError::Other)?;

        Ok(AttemptOutput {
            html: extraction.html,
            markdown,
            revealed_count: extraction.revealed_count,
            caveats: extraction.caveats,
        })
    }

    /// Fast path: sanitize the current page
    async fn extract(&self, page: &dyn PageDriver, attempt: u32) -> Result<Extraction, ScrapeError> {
        self.enter(attempt, Phase::Extract)?;
        let html = reconciler::combine(page, &[]).await?;
        Ok(Extraction::plain(html))
    }

    async fn discover_and_interact(
        &self,
        page: &dyn PageDriver,
        attempt: u32,
    ) -> Result<Extraction, ScrapeError> {
        let timeouts = &self.config().timeouts;
        let limits = &self.config().limits;

        self.enter(attempt, Phase::DiscoverElements)?;
        let deadline = tokio::time::Instant::now() + timeouts.session_deadline();
        let content = page.content().await?;
        let snapshot = sanitize::reduce_for_model(&content);
        if snapshot.len() > limits.max_snapshot_chars {
            info!(
                "Snapshot of {} chars exceeds {}, using normal extraction",
                snapshot.len(),
                limits.max_snapshot_chars
            );
            self.log.note("snapshot too large, normal extraction".to_string());
            return self.extract(page, attempt).await;
        }

        let analysis = tokio::time::timeout_at(
            deadline,
            self.scraper
                .analyzer
                .analyze(&snapshot, self.request.query.as_deref()),
        )
        .await;
        let analysis = match analysis {
            Ok(Ok(analysis)) => analysis,
            Ok(Err(e)) => return self.analysis_failed(page, attempt, e).await,
            Err(_) => {
                warn!("Session deadline reached during element discovery");
                return self
                    .degraded(page, attempt, "session deadline reached during element discovery")
                    .await;
            }
        };

        let candidates = prepare_candidates(analysis.candidates(), &snapshot, limits.max_candidates);
        info!(
            "Model verdict {:?}, {} candidate(s)",
            analysis.interaction_needed,
            candidates.len()
        );
        self.log.note(format!("{} candidate(s)", candidates.len()));
        self.emit(ProgressEvent::CandidatesDiscovered {
            count: candidates.len(),
        });

        self.enter(attempt, Phase::InteractLoop)?;
        let (items, mut caveats) = self.interact_loop(page, &candidates, deadline).await?;
        self.log.note(format!(
            "{} of {} candidate(s) revealed content",
            items.len(),
            candidates.len()
        ));

        self.enter_wrap_up(attempt, Phase::Combine, &mut caveats);
        let html = reconciler::combine(page, &items).await?;
        if html.trim().is_empty() {
            caveats.push("merged document was empty".to_string());
        }
        Ok(Extraction {
            html,
            revealed_count: items.len(),
            caveats,
        })
    }

    /// Model failures of the service itself degrade to a partial result;
    /// transport and rate-limit failures go to the retry policy.
    async fn analysis_failed(
        &self,
        page: &dyn PageDriver,
        attempt: u32,
        error: AnalysisError,
    ) -> Result<Extraction, ScrapeError> {
        let category = error.category();
        if category != ErrorCategory::AiService {
            return Err(ScrapeError::Analysis {
                category,
                message: error.to_string(),
            });
        }
        warn!("Content analysis failed, falling back to normal extraction: {}", error);
        self.degraded(page, attempt, &format!("content analysis failed: {}", error))
            .await
    }

    async fn degraded(
        &self,
        page: &dyn PageDriver,
        attempt: u32,
        caveat: &str,
    ) -> Result<Extraction, ScrapeError> {
        let mut extraction = self.extract(page, attempt).await?;
        extraction.caveats.push(caveat.to_string());
        Ok(extraction)
    }

    async fn interact_loop(
        &self,
        page: &dyn PageDriver,
        candidates: &[CandidateElement],
        deadline: tokio::time::Instant,
    ) -> Result<(Vec<RevealedContentItem>, Vec<String>), ScrapeError> {
        let executor = InteractionExecutor::from_config(&self.config().timeouts);
        let mut items = Vec::new();
        let mut caveats = Vec::new();

        for (index, candidate) in candidates.iter().enumerate() {
            if self.cancel.is_cancelled() {
                info!(
                    "Cancelled after {} of {} candidate(s), combining what was revealed",
                    index,
                    candidates.len()
                );
                self.note_cancelled(&mut caveats);
                break;
            }
            let round = async {
                let item = self.process_candidate(page, &executor, candidate, index, candidates.len()).await;
                self.clear_overlays(page).await;
                item
            };
            match tokio::time::timeout_at(deadline, round).await {
                Ok(Some(item)) => items.push(item),
                Ok(None) => {}
                Err(_) => {
                    warn!(
                        "Session deadline reached after {} of {} candidate(s)",
                        index,
                        candidates.len()
                    );
                    let armed = self.armed_slot().take();
                    if let Some(handle) = armed
                        && let Err(e) = tracker::detach(page, handle).await
                    {
                        debug!("Tracker detach failed: {:#}", e);
                    }
                    caveats.push(format!(
                        "session deadline reached after {} of {} candidates",
                        index,
                        candidates.len()
                    ));
                    break;
                }
            }
        }
        Ok((items, caveats))
    }

    /// Arm the tracker, act, and keep the best change. Every failure here
    /// skips the candidate.
    async fn process_candidate(
        &self,
        page: &dyn PageDriver,
        executor: &InteractionExecutor,
        candidate: &CandidateElement,
        index: usize,
        total: usize,
    ) -> Option<RevealedContentItem> {
        self.emit(ProgressEvent::CandidateStarted {
            index,
            total,
            selector: candidate.selector.clone(),
        });

        let target = match executor.resolve_target(page, candidate).await {
            Ok(target) => target,
            Err(reason) => {
                warn!("Skipping candidate '{}': {}", candidate.selector, reason);
                self.skipped(candidate, reason.to_string());
                return None;
            }
        };

        let handle = match tracker::attach(page).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Skipping candidate '{}': {:#}", candidate.selector, e);
                self.skipped(candidate, format!("{:#}", e));
                return None;
            }
        };
        *self.armed_slot() = Some(handle.clone());

        let changes = match executor.attempt(page, &target, candidate.interaction_type).await {
            Ok(()) => tracker::drain_changes(page, &handle).await.unwrap_or_else(|e| {
                warn!("Failed to read changes for '{}': {:#}", candidate.selector, e);
                Vec::new()
            }),
            Err(reason) => {
                warn!(
                    "Skipping {} on {}: {}",
                    candidate.interaction_type.as_str(),
                    target,
                    reason
                );
                self.skipped(candidate, reason.to_string());
                Vec::new()
            }
        };
        self.armed_slot().take();
        if let Err(e) = tracker::detach(page, handle).await {
            debug!("Tracker detach failed: {:#}", e);
        }

        let best = ObservedChange::best(&changes)?;
        debug!(
            "'{}' revealed {} ({} chars of text)",
            candidate.selector,
            best.change_type.as_str(),
            best.text_length
        );
        self.emit(ProgressEvent::ContentRevealed {
            selector: candidate.selector.clone(),
            change_type: best.change_type,
        });
        Some(RevealedContentItem::from_change(candidate, target.index, best))
    }

    fn skipped(&self, candidate: &CandidateElement, reason: String) {
        self.emit(ProgressEvent::CandidateSkipped {
            selector: candidate.selector.clone(),
            reason,
        });
    }

    /// Look for overlays a candidate may have opened and close them
    async fn clear_overlays(&self, page: &dyn PageDriver) {
        let search = self.config().timeouts.overlay_search();
        let blocked = match overlay::is_scrolling_blocked(page).await {
            Ok(blocked) => blocked,
            Err(e) => {
                debug!("Scroll state check failed: {:#}", e);
                false
            }
        };
        let overlays = match tokio::time::timeout(search, overlay::find_overlays(page)).await {
            Ok(Ok(overlays)) => overlays,
            Ok(Err(e)) => {
                debug!("Overlay search failed: {:#}", e);
                return;
            }
            Err(_) => {
                debug!("Overlay search timed out");
                return;
            }
        };
        if overlays.is_empty() {
            if blocked {
                debug!("Scrolling is blocked but no overlay was found");
            }
            return;
        }
        if overlay::dismiss(page, &overlays).await {
            self.emit(ProgressEvent::OverlaysDismissed {
                count: overlays.len(),
            });
        } else {
            warn!("Could not dismiss {} overlay(s)", overlays.len());
        }
    }

    fn finish(self, result: Result<AttemptOutput, ScrapeError>, attempts: u32) -> ScrapeResult {
        let mut scrape = ScrapeResult {
            outcome: ScrapeOutcome::Failed,
            url: self.request.url.clone(),
            mode: self.request.mode,
            markdown: None,
            html: None,
            revealed_count: 0,
            attempts,
            phase_log: Vec::new(),
            enhanced_error: None,
            error: None,
        };

        match result {
            Ok(output) => {
                self.log.enter(attempts, Phase::Done);
                scrape.outcome = if output.caveats.is_empty() {
                    ScrapeOutcome::Success
                } else {
                    ScrapeOutcome::Partial
                };
                if !output.caveats.is_empty() {
                    scrape.enhanced_error = Some(output.caveats.join("; "));
                }
                scrape.markdown = Some(output.markdown);
                scrape.html = Some(output.html);
                scrape.revealed_count = output.revealed_count;
                info!(
                    "Scraped {} after {} attempt(s), {} revealed item(s)",
                    scrape.url, attempts, scrape.revealed_count
                );
            }
            Err(e) => {
                self.log.enter(attempts, Phase::Failed);
                let message = match e {
                    ScrapeError::Cancelled => CANCELLED.to_string(),
                    ref other => other.to_string(),
                };
                warn!("Scrape of {} failed after {} attempt(s): {}", scrape.url, attempts, message);
                scrape.error = Some(FailureInfo {
                    category: e.category(),
                    message,
                });
            }
        }

        scrape.phase_log = self.log.into_records();
        self.scraper.progress.emit(ProgressEvent::Finished {
            outcome: scrape.outcome,
        });
        scrape
    }
}

/// Drop duplicate `(selector, textContent)` pairs, cap the count and log
/// candidates whose target content already looks present in the snapshot
pub fn prepare_candidates(
    candidates: &[CandidateElement],
    snapshot: &str,
    max: usize,
) -> Vec<CandidateElement> {
    let doc = Document::parse(snapshot);
    let mut seen = HashSet::new();
    let mut prepared = Vec::new();

    for candidate in candidates {
        if !seen.insert((candidate.selector.as_str(), candidate.text_content.as_str())) {
            debug!("Dropping duplicate candidate '{}'", candidate.selector);
            continue;
        }
        if prepared.len() == max {
            warn!(
                "Candidate limit {} reached, ignoring the rest",
                max
            );
            break;
        }
        if let Some(reason) = already_revealed(&doc, &candidate.selector) {
            info!(
                "Candidate '{}' may target content already present ({}), trying anyway",
                candidate.selector, reason
            );
        }
        prepared.push(candidate.clone());
    }
    prepared
}

/// Cheap local check: the control reports itself expanded, or the region
/// it controls is in the snapshot with text and not hidden
fn already_revealed(doc: &Document, selector: &str) -> Option<&'static str> {
    let matches = query::select_css(doc, selector).ok()?;
    let &control = matches.first()?;
    if doc.attr(control, "aria-expanded") == Some("true") {
        return Some("aria-expanded");
    }
    let controls = doc.attr(control, "aria-controls")?;
    let region = doc
        .elements()
        .into_iter()
        .find(|&id| doc.attr(id, "id") == Some(controls))?;
    let visible = doc.attr(region, "hidden").is_none()
        && doc.attr(region, "aria-hidden") != Some("true")
        && !doc.normalized_text(region).is_empty();
    visible.then_some("controlled region visible")
}

/// Phase log shared by all attempts of a session
struct PhaseLog {
    progress: Arc<dyn ProgressSink>,
    state: Mutex<PhaseLogState>,
}

#[derive(Default)]
struct PhaseLogState {
    records: Vec<PhaseRecord>,
    current: Option<Instant>,
}

impl PhaseLog {
    fn new(progress: Arc<dyn ProgressSink>) -> Self {
        Self {
            progress,
            state: Mutex::new(PhaseLogState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, PhaseLogState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Close the open record and start one for `phase`
    fn enter(&self, attempt: u32, phase: Phase) {
        {
            let mut state = self.state();
            state.close_current();
            state.records.push(PhaseRecord {
                attempt,
                phase,
                started_at: Utc::now(),
                elapsed_ms: 0,
                detail: None,
            });
            state.current = Some(Instant::now());
        }
        info!("[attempt {}] {}", attempt, phase.as_str());
        self.progress.emit(ProgressEvent::PhaseStarted { attempt, phase });
    }

    /// Attach a detail to the open record
    fn note(&self, detail: String) {
        debug!("{}", detail);
        if let Some(record) = self.state().records.last_mut() {
            record.detail = Some(detail);
        }
    }

    fn into_records(self) -> Vec<PhaseRecord> {
        let mut state = self
            .state
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.close_current();
        state.records
    }
}

impl PhaseLogState {
    fn close_current(&mut self) {
        if let Some(started) = self.current.take()
            && let Some(record) = self.records.last_mut()
        {
            record.elapsed_ms = started.elapsed().as_millis() as u64;
        }
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;
