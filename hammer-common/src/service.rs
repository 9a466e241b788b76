//! Contract with the remote Stack Hammer service.
//!
//! Transport and authentication live behind [`StackService`]; this crate only
//! depends on the five operations below.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use thiserror::Error;

use crate::aggregate::DeploymentResult;
use crate::diagnostic::ResultWithDiagnostic;
use crate::job::{DeployMode, JobId, PollResult};

/// Network or IO failure talking to the service. Never retried here.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection to {endpoint} failed: {message}")]
    Connect { endpoint: String, message: String },

    #[error("request {operation} failed with status {status}: {message}")]
    Status {
        operation: String,
        status: u16,
        message: String,
    },

    #[error("malformed response to {operation}: {message}")]
    Decode { operation: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Source code hosting provider of a stack repository.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Github,
}

impl Provider {
    /// Browsable base URL of a branch.
    pub fn repository_base(self, owner: &str, name: &str, branch: &str) -> String {
        match self {
            Self::Github => format!("https://github.com/{owner}/{name}/tree/{branch}"),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Github => write!(f, "github"),
        }
    }
}

/// A repository clone held by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    #[serde(default)]
    pub provider: Provider,
    pub owner: String,
    pub name: String,
    pub branch: String,
}

impl Repository {
    pub fn repository_base(&self) -> String {
        self.provider
            .repository_base(&self.owner, &self.name, &self.branch)
    }

    /// `owner/name`, the stack identifier the service expects.
    pub fn stack_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

// ── Stack References ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StackRefError {
    #[error("Please specify a stack")]
    Empty,
    #[error("Stack must be in the form <owner>/<name>, got '{0}'")]
    Malformed(String),
}

/// `owner/name` reference to a stack.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StackRef {
    pub owner: String,
    pub name: String,
}

impl StackRef {
    pub fn parse(value: &str) -> Result<Self, StackRefError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(StackRefError::Empty);
        }
        let mut parts = value.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(owner), Some(name), None) => {
                let (owner, name) = (owner.trim(), name.trim());
                if owner.is_empty() || name.is_empty() {
                    return Err(StackRefError::Malformed(value.to_string()));
                }
                Ok(Self {
                    owner: owner.to_string(),
                    name: name.to_string(),
                })
            }
            _ => Err(StackRefError::Malformed(value.to_string())),
        }
    }
}

impl std::str::FromStr for StackRef {
    type Err = StackRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for StackRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

// ── Service Contract ─────────────────────────────────────────────────────

/// Operations offered by the remote service.
///
/// `poll_job` is incremental: each call returns only log entries not
/// returned by an earlier call for the same job.
pub trait StackService {
    /// Make sure the service holds a clone of the given branch.
    fn clone_repository(
        &self,
        provider: Provider,
        owner: &str,
        name: &str,
        branch: &str,
    ) -> impl Future<Output = Result<ResultWithDiagnostic<Repository>, TransportError>>;

    /// Validate a stack; the result is the base64 SVG dependency graph.
    fn validate_stack(
        &self,
        repository: &Repository,
        stack: &str,
    ) -> impl Future<Output = Result<ResultWithDiagnostic<String>, TransportError>>;

    /// Start an asynchronous deployment job.
    fn deploy_stack(
        &self,
        repository: &Repository,
        stack: &str,
        mode: DeployMode,
    ) -> impl Future<Output = Result<JobId, TransportError>>;

    fn poll_job(&self, job_id: &JobId)
    -> impl Future<Output = Result<PollResult, TransportError>>;

    /// Final topology of a job. Only valid after a non-cancelled terminal state.
    fn fetch_deployment_result(
        &self,
        job_id: &JobId,
    ) -> impl Future<Output = Result<DeploymentResult, TransportError>>;
}
