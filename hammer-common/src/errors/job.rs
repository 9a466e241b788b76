use std::fmt;
use std::time::Duration;
use thiserror::Error;

use super::catalog::ErrorCode;
use crate::diagnostic::{Diagnostic, Severity};
use crate::job::JobId;
use crate::service::{StackRefError, TransportError};
use crate::util::humanize_duration;

/// Remote operation a diagnostic belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackOperation {
    Clone,
    Validate,
    Deploy,
}

impl fmt::Display for StackOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clone => write!(f, "clone"),
            Self::Validate => write!(f, "validation"),
            Self::Deploy => write!(f, "deployment"),
        }
    }
}

fn budget_text(budget: &Duration) -> String {
    humanize_duration(*budget)
}

/// Why a stack operation stopped. None of these are retried internally.
#[derive(Debug, Error)]
pub enum JobError {
    /// Calling the service failed.
    #[error("service call failed: {0}")]
    Transport(#[from] TransportError),

    /// The service's own diagnostic tree reported ERROR or FATAL.
    #[error("{operation} reported {severity}:\n{diagnostic}", severity = .diagnostic.effective_severity())]
    RemoteSeverity {
        operation: StackOperation,
        diagnostic: Diagnostic,
    },

    /// Wall-clock budget of the poll loop exhausted; the job is left running.
    #[error("job {job_id} didn't finish within {}", budget_text(.budget))]
    TimeoutExceeded { job_id: JobId, budget: Duration },

    /// The service reported the job as cancelled.
    #[error("job {job_id} was cancelled")]
    JobCancelled { job_id: JobId },

    /// The caller asked the poller to stop; the job is left running.
    #[error("polling of job {job_id} was aborted")]
    Aborted { job_id: JobId },

    #[error(transparent)]
    InvalidStack(#[from] StackRefError),
}

impl JobError {
    /// Catalog code for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Transport(TransportError::Connect { .. }) => ErrorCode::ServiceConnectFailed,
            Self::Transport(TransportError::Status { .. }) => ErrorCode::ServiceRequestFailed,
            Self::Transport(TransportError::Decode { .. }) => ErrorCode::ServiceBadResponse,
            Self::Transport(TransportError::Io(_)) => ErrorCode::ServiceIoError,
            Self::RemoteSeverity { operation, .. } => match operation {
                StackOperation::Clone => ErrorCode::StackCloneFailed,
                StackOperation::Validate => ErrorCode::StackValidationFailed,
                StackOperation::Deploy => ErrorCode::StackDeploymentFailed,
            },
            Self::TimeoutExceeded { .. } => ErrorCode::JobTimeout,
            Self::JobCancelled { .. } => ErrorCode::JobCancelledRemotely,
            Self::Aborted { .. } => ErrorCode::JobAborted,
            Self::InvalidStack(_) => ErrorCode::ConfigInvalidStack,
        }
    }

    /// The remote diagnostic carried by a `RemoteSeverity` error.
    pub fn diagnostic(&self) -> Option<&Diagnostic> {
        match self {
            Self::RemoteSeverity { diagnostic, .. } => Some(diagnostic),
            _ => None,
        }
    }

    /// Severity to report for this failure.
    pub fn severity(&self) -> Severity {
        match self {
            Self::RemoteSeverity { diagnostic, .. } => diagnostic.effective_severity(),
            _ => Severity::Error,
        }
    }
}
