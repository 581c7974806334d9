//! Fire-and-forget progress reporting.

use tokio::sync::mpsc::UnboundedSender;
use tracing::trace;

use crate::types::ProgressEvent;

/// Receives session events. Implementations must not block; errors are
/// swallowed by the implementation, never surfaced to the session.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn emit(&self, _event: ProgressEvent) {}
}

impl ProgressSink for UnboundedSender<ProgressEvent> {
    fn emit(&self, event: ProgressEvent) {
        if self.send(event).is_err() {
            trace!("Progress receiver dropped");
        }
    }
}

/// Logs events as JSON lines at debug level
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ProgressSink for LogSink {
    fn emit(&self, event: ProgressEvent) {
        match serde_json::to_string(&event) {
            Ok(line) => tracing::debug!(target: "pagesift::progress", "{}", line),
            Err(e) => trace!("Unserializable progress event: {}", e),
        }
    }
}

#[cfg(test)]
#[path = "progress_test.rs"]
mod progress_test;
