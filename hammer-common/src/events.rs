//! Broadcast of job lifecycle events as JSON lines.
//!
//! Every line has the shape `{"event": <name>, "data": {...}, "timestamp": <rfc3339>}`.

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::warn;

use crate::diagnostic::Severity;
use crate::job::{JobId, JobState};

const DEFAULT_BUFFER: usize = 256;

/// Broadcast channel for job events (JSON lines).
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<String>,
}

impl EventBus {
    /// Create a new event bus with the provided buffer size.
    ///
    /// The effective buffer is clamped to at least `DEFAULT_BUFFER`; a burst
    /// of log batches must not make subscribers lag.
    pub fn new(buffer: usize) -> Self {
        let buffer = buffer.max(DEFAULT_BUFFER);
        let (sender, _) = broadcast::channel(buffer);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.sender.subscribe()
    }

    /// Emit a structured event with payload. Dropped silently when nobody
    /// is subscribed.
    pub fn emit<T: Serialize>(&self, event: &str, data: &T) {
        let payload = json!({
            "event": event,
            "data": data,
            "timestamp": Utc::now().to_rfc3339(),
        });
        match serde_json::to_string(&payload) {
            Ok(serialized) => {
                let _ = self.sender.send(serialized);
            }
            Err(err) => warn!("Failed to serialize event {}: {}", event, err),
        }
    }

    /// Emit a job lifecycle event under its own name.
    pub fn publish(&self, event: &JobEvent) {
        self.emit(event.name(), event);
    }
}

/// Lifecycle of one deployment job as seen by the poller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum JobEvent {
    Submitted {
        job_id: JobId,
        stack: String,
        dry_run: bool,
    },
    Polled {
        job_id: JobId,
        state: JobState,
        entries: usize,
        poll: u32,
    },
    Finished {
        job_id: JobId,
        state: JobState,
        severity: Severity,
        polls: u32,
        elapsed_ms: u64,
    },
    Failed {
        job_id: JobId,
        code: String,
        error: String,
    },
}

impl JobEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Submitted { .. } => "job_submitted",
            Self::Polled { .. } => "job_polled",
            Self::Finished { .. } => "job_finished",
            Self::Failed { .. } => "job_failed",
        }
    }

    pub fn job_id(&self) -> &JobId {
        match self {
            Self::Submitted { job_id, .. }
            | Self::Polled { job_id, .. }
            | Self::Finished { job_id, .. }
            | Self::Failed { job_id, .. } => job_id,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}
