//! In-memory stack service that replays a scripted job.
//!
//! It opens no connection: every answer comes from the script given to the
//! builder or read from a JSON scenario file. Used by tests and by the CLI's
//! replay mode.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use crate::aggregate::DeploymentResult;
use crate::diagnostic::ResultWithDiagnostic;
use crate::errors::ErrorCode;
use crate::job::{DeployMode, JobId, JobState, PollResult};
use crate::service::{Provider, Repository, StackService, TransportError};

static SCRIPTED_JOB_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Call at which the scripted service fails with a transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePoint {
    Clone,
    Validate,
    Deploy,
    /// The n-th poll (1-based).
    Poll(u32),
    Fetch,
}

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("failed to read scenario {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid scenario {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl ScenarioError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::InternalScenarioError
    }
}

/// Serialized form of a scripted job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    pub job_id: Option<String>,
    pub clone: Option<ResultWithDiagnostic<Repository>>,
    pub validation: Option<ResultWithDiagnostic<String>>,
    pub polls: Vec<PollResult>,
    /// Simulated processing time of each poll, in milliseconds.
    pub poll_delay_ms: Vec<u64>,
    pub result: Option<DeploymentResult>,
    pub fail_on: Option<FailurePoint>,
}

impl Scenario {
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ScenarioError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ScenarioError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&content).map_err(|source| ScenarioError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Debug, Default)]
struct CallLog {
    polls: usize,
    fetches: usize,
    poll_times: Vec<Instant>,
    deploy_modes: Vec<DeployMode>,
}

/// Scripted [`StackService`].
#[derive(Debug)]
pub struct ScriptedStackService {
    job_id: JobId,
    clone: Option<ResultWithDiagnostic<Repository>>,
    validation: Option<ResultWithDiagnostic<String>>,
    polls: Vec<PollResult>,
    poll_delays: Vec<Duration>,
    result: Option<DeploymentResult>,
    fail_on: Option<FailurePoint>,
    calls: Mutex<CallLog>,
}

impl ScriptedStackService {
    pub fn builder() -> ScriptedStackServiceBuilder {
        ScriptedStackServiceBuilder::default()
    }

    pub fn from_scenario(scenario: Scenario) -> Self {
        let mut builder = Self::builder()
            .polls(scenario.polls)
            .poll_delays(
                scenario
                    .poll_delay_ms
                    .into_iter()
                    .map(Duration::from_millis)
                    .collect(),
            );
        if let Some(job_id) = scenario.job_id {
            builder = builder.job_id(job_id);
        }
        if let Some(clone) = scenario.clone {
            builder = builder.clone_result(clone);
        }
        if let Some(validation) = scenario.validation {
            builder = builder.validation(validation);
        }
        if let Some(result) = scenario.result {
            builder = builder.result(result);
        }
        if let Some(point) = scenario.fail_on {
            builder = builder.fail_on(point);
        }
        builder.build()
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    fn calls(&self) -> MutexGuard<'_, CallLog> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn poll_count(&self) -> usize {
        self.calls().polls
    }

    pub fn fetch_count(&self) -> usize {
        self.calls().fetches
    }

    /// Instants at which each poll started.
    pub fn poll_times(&self) -> Vec<Instant> {
        self.calls().poll_times.clone()
    }

    pub fn deploy_modes(&self) -> Vec<DeployMode> {
        self.calls().deploy_modes.clone()
    }

    fn fails_at(&self, point: FailurePoint) -> bool {
        self.fail_on == Some(point)
    }

    fn injected(operation: &str) -> TransportError {
        TransportError::Status {
            operation: operation.to_string(),
            status: 503,
            message: "scripted failure".to_string(),
        }
    }

    /// Script entry for the given 0-based poll. Once the script runs out the
    /// last state repeats with no new entries.
    fn scripted_poll(&self, index: usize) -> PollResult {
        match self.polls.get(index) {
            Some(poll) => poll.clone(),
            None => PollResult::new(
                self.polls
                    .last()
                    .map(|poll| poll.state)
                    .unwrap_or(JobState::Running),
            ),
        }
    }
}

impl StackService for ScriptedStackService {
    async fn clone_repository(
        &self,
        provider: Provider,
        owner: &str,
        name: &str,
        branch: &str,
    ) -> Result<ResultWithDiagnostic<Repository>, TransportError> {
        if self.fails_at(FailurePoint::Clone) {
            return Err(Self::injected("cloneRepository"));
        }
        Ok(self.clone.clone().unwrap_or_else(|| {
            ResultWithDiagnostic::success(
                format!("Cloned {owner}/{name}"),
                Repository {
                    provider,
                    owner: owner.to_string(),
                    name: name.to_string(),
                    branch: branch.to_string(),
                },
            )
        }))
    }

    async fn validate_stack(
        &self,
        _repository: &Repository,
        stack: &str,
    ) -> Result<ResultWithDiagnostic<String>, TransportError> {
        if self.fails_at(FailurePoint::Validate) {
            return Err(Self::injected("validateStack"));
        }
        Ok(self.validation.clone().unwrap_or_else(|| {
            ResultWithDiagnostic::success(format!("Validated {stack}"), String::new())
        }))
    }

    async fn deploy_stack(
        &self,
        _repository: &Repository,
        stack: &str,
        mode: DeployMode,
    ) -> Result<JobId, TransportError> {
        if self.fails_at(FailurePoint::Deploy) {
            return Err(Self::injected("deployStack"));
        }
        self.calls().deploy_modes.push(mode);
        debug!(job_id = %self.job_id, stack, "Scripted deployment submitted");
        Ok(self.job_id.clone())
    }

    async fn poll_job(&self, job_id: &JobId) -> Result<PollResult, TransportError> {
        let index = {
            let mut calls = self.calls();
            calls.polls += 1;
            calls.poll_times.push(Instant::now());
            calls.polls - 1
        };
        if self.fails_at(FailurePoint::Poll(index as u32 + 1)) {
            return Err(Self::injected("pollJob"));
        }
        if let Some(delay) = self.poll_delays.get(index).filter(|d| !d.is_zero()) {
            tokio::time::sleep(*delay).await;
        }
        let poll = self.scripted_poll(index);
        debug!(job_id = %job_id, state = %poll.state, entries = poll.log_entries.len(), "Scripted poll");
        Ok(poll)
    }

    async fn fetch_deployment_result(
        &self,
        _job_id: &JobId,
    ) -> Result<DeploymentResult, TransportError> {
        self.calls().fetches += 1;
        if self.fails_at(FailurePoint::Fetch) {
            return Err(Self::injected("getDeploymentResult"));
        }
        Ok(self
            .result
            .clone()
            .unwrap_or_else(|| ResultWithDiagnostic::success("Deployment finished", Vec::new())))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedStackServiceBuilder {
    job_id: Option<JobId>,
    clone: Option<ResultWithDiagnostic<Repository>>,
    validation: Option<ResultWithDiagnostic<String>>,
    polls: Vec<PollResult>,
    poll_delays: Vec<Duration>,
    result: Option<DeploymentResult>,
    fail_on: Option<FailurePoint>,
}

impl ScriptedStackServiceBuilder {
    pub fn job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(JobId::new(job_id));
        self
    }

    /// Answer to `clone_repository`. Defaults to a clean clone of the
    /// requested branch.
    pub fn clone_result(mut self, clone: ResultWithDiagnostic<Repository>) -> Self {
        self.clone = Some(clone);
        self
    }

    pub fn validation(mut self, validation: ResultWithDiagnostic<String>) -> Self {
        self.validation = Some(validation);
        self
    }

    /// Append one poll answer to the script.
    pub fn poll(mut self, poll: PollResult) -> Self {
        self.polls.push(poll);
        self
    }

    pub fn polls(mut self, polls: Vec<PollResult>) -> Self {
        self.polls.extend(polls);
        self
    }

    /// Processing time of each poll, by position.
    pub fn poll_delays(mut self, delays: Vec<Duration>) -> Self {
        self.poll_delays = delays;
        self
    }

    pub fn result(mut self, result: DeploymentResult) -> Self {
        self.result = Some(result);
        self
    }

    pub fn fail_on(mut self, point: FailurePoint) -> Self {
        self.fail_on = Some(point);
        self
    }

    pub fn build(self) -> ScriptedStackService {
        ScriptedStackService {
            job_id: self.job_id.unwrap_or_else(default_job_id),
            clone: self.clone,
            validation: self.validation,
            polls: self.polls,
            poll_delays: self.poll_delays,
            result: self.result,
            fail_on: self.fail_on,
            calls: Mutex::new(CallLog::default()),
        }
    }
}

fn default_job_id() -> JobId {
    let id = SCRIPTED_JOB_COUNTER.fetch_add(1, Ordering::SeqCst) + 1;
    JobId::new(format!("scripted-job-{id}"))
}
