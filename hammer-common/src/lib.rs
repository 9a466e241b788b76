//! Core of the Stack Hammer client.
//!
//! - [`diagnostic`]: severity trees returned by every remote operation
//! - [`poller`]: drift-free polling of a deployment job
//! - [`correlate`] and [`aggregate`]: per-host view of the job log and
//!   the final topology
//! - [`operations`]: validate and deploy a stack through a [`StackService`]

pub mod aggregate;
pub mod config;
pub mod correlate;
pub mod diagnostic;
pub mod errors;
pub mod events;
pub mod job;
pub mod operations;
pub mod poller;
pub mod scripted;
pub mod service;
pub mod util;

pub use aggregate::{CatalogGraph, DeploymentResult, HostEntry, ResultAggregator};
pub use correlate::{LogCorrelator, LogGroups, UNKNOWN_HOST, UnattachedPolicy};
pub use diagnostic::{Diagnostic, ResultWithDiagnostic, Severity};
pub use errors::{ErrorCategory, ErrorCode, JobError, StackOperation};
pub use events::{EventBus, JobEvent};
pub use job::{DeployMode, JobId, JobState, LogEntry, PollResult};
pub use operations::{DEFAULT_BRANCH, Deployer, DeploymentReport, ValidationReport, Validator};
pub use poller::{CancelHandle, JobOutcome, JobPoller, PollerConfig};
pub use scripted::{FailurePoint, Scenario, ScenarioError, ScriptedStackService};
pub use service::{Provider, Repository, StackRef, StackRefError, StackService, TransportError};
