//! Remote job model: identifiers, lifecycle states and log entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::diagnostic::Severity;

/// Identifier handed out by the service when a job is submitted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Job State ────────────────────────────────────────────────────────────

/// Lifecycle state of a remote job as reported by a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Accepted, waiting for an execution slot.
    Scheduled,
    /// Execution slot acquired, job is booting.
    Starting,
    /// Running but currently idle (waiting on a resource or timer).
    Sleeping,
    /// Actively running.
    Running,
    /// Cancelled remotely.
    Cancelled,
    /// Finished; the result may still carry error diagnostics.
    Succeeded,
    /// Finished abnormally; the result carries the reason.
    Failed,
}

impl JobState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Succeeded | Self::Failed)
    }

    /// Not yet picked up by an executor.
    pub const fn is_pending(self) -> bool {
        matches!(self, Self::Scheduled | Self::Starting)
    }

    /// Whether a poll may observe `next` directly after `self`.
    ///
    /// Polls are sampled, so intermediate states may be skipped; the table only
    /// forbids going backwards and leaving a terminal state.
    pub fn can_transition_to(self, next: JobState) -> bool {
        if self == next {
            return true;
        }
        match self {
            Self::Cancelled | Self::Succeeded | Self::Failed => false,
            Self::Scheduled => true,
            Self::Starting => !matches!(next, Self::Scheduled),
            Self::Sleeping | Self::Running => !next.is_pending(),
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scheduled => write!(f, "scheduled"),
            Self::Starting => write!(f, "starting"),
            Self::Sleeping => write!(f, "sleeping"),
            Self::Running => write!(f, "running"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

// ── Log Entries ──────────────────────────────────────────────────────────

/// One line of job output.
///
/// `logical_origin` names the topology node, `physical_origin` the machine
/// that actually emitted the line. Either, both or neither may be present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logical_origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_origin: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default = "default_entry_severity")]
    pub severity: Severity,
    pub message: String,
}

fn default_entry_severity() -> Severity {
    Severity::Info
}

impl LogEntry {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            logical_origin: None,
            physical_origin: None,
            timestamp: Utc::now(),
            severity: Severity::Info,
            message: message.into(),
        }
    }

    pub fn with_logical(mut self, host: impl Into<String>) -> Self {
        self.logical_origin = Some(host.into());
        self
    }

    pub fn with_physical(mut self, machine: impl Into<String>) -> Self {
        self.physical_origin = Some(machine.into());
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Lines with no origin at all are global and never host-correlated.
    pub fn is_global(&self) -> bool {
        self.logical_origin.is_none() && self.physical_origin.is_none()
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.timestamp.to_rfc3339(), self.severity)?;
        match (&self.logical_origin, &self.physical_origin) {
            (Some(host), Some(machine)) => write!(f, " [{host}@{machine}]")?,
            (Some(host), None) => write!(f, " [{host}]")?,
            (None, Some(machine)) => write!(f, " [@{machine}]")?,
            (None, None) => {}
        }
        write!(f, " {}", self.message)
    }
}

/// Reply to a single poll: current state plus entries not delivered before.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollResult {
    pub state: JobState,
    #[serde(default)]
    pub log_entries: Vec<LogEntry>,
}

impl PollResult {
    pub fn new(state: JobState) -> Self {
        Self {
            state,
            log_entries: Vec::new(),
        }
    }

    pub fn with_entries(state: JobState, log_entries: Vec<LogEntry>) -> Self {
        Self { state, log_entries }
    }
}

/// Submission options for a deployment job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployMode {
    /// Plan the deployment without touching any machine.
    #[serde(default)]
    pub dry_run: bool,
}

impl DeployMode {
    pub fn dry_run() -> Self {
        Self { dry_run: true }
    }
}
