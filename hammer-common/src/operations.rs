//! Validate and deploy stacks against a [`StackService`].

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::sync::Arc;
use tracing::{error, info};

use crate::aggregate::{HostEntry, ResultAggregator};
use crate::correlate::UnattachedPolicy;
use crate::diagnostic::{ResultWithDiagnostic, Severity};
use crate::errors::{JobError, StackOperation};
use crate::events::EventBus;
use crate::job::DeployMode;
use crate::poller::{CancelHandle, JobOutcome, JobPoller, PollerConfig};
use crate::service::{Provider, Repository, StackRef, StackService};

/// Branch used when none is given.
pub const DEFAULT_BRANCH: &str = "master";

/// Make sure the service holds a clone, failing on ERROR or worse.
async fn clone_stack<S: StackService>(
    service: &S,
    provider: Provider,
    stack: &StackRef,
    branch: &str,
) -> Result<(ResultWithDiagnostic<Repository>, Repository), JobError> {
    info!(stack = %stack, branch, "Verifying that the service holds a clone of the repository");
    let clone = service
        .clone_repository(provider, &stack.owner, &stack.name, branch)
        .await?;
    if clone.is_failure() {
        error!(stack = %stack, severity = %clone.effective_severity(), "Clone failed");
        clone.diagnostic.log();
        return Err(JobError::RemoteSeverity {
            operation: StackOperation::Clone,
            diagnostic: clone.diagnostic,
        });
    }

    let repository = clone.result.clone().unwrap_or_else(|| Repository {
        provider,
        owner: stack.owner.clone(),
        name: stack.name.clone(),
        branch: branch.to_string(),
    });
    Ok((clone, repository))
}

// ── Validation ───────────────────────────────────────────────────────────

/// Outcome of a successful validation.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub clone: ResultWithDiagnostic<Repository>,
    pub repository: Repository,
    /// Result is the base64-encoded SVG dependency graph.
    pub validation: ResultWithDiagnostic<String>,
}

impl ValidationReport {
    pub fn summary(&self) -> String {
        self.validation.diagnostic.summary()
    }

    pub fn severity(&self) -> Severity {
        self.validation.effective_severity()
    }

    /// Base64 SVG of the stack's dependency graph, when one was produced.
    pub fn graph_payload(&self) -> Option<&str> {
        self.validation
            .result
            .as_deref()
            .filter(|payload| !payload.is_empty())
    }

    /// Decoded SVG bytes of the dependency graph.
    pub fn decode_graph(&self) -> Option<Result<Vec<u8>, base64::DecodeError>> {
        self.graph_payload()
            .map(|payload| STANDARD.decode(payload.trim()))
    }

    pub fn stack_base(&self) -> String {
        self.repository.repository_base()
    }
}

pub struct Validator {
    stack: StackRef,
    branch: String,
    provider: Provider,
}

impl Validator {
    pub fn new(stack: &str, branch: impl Into<String>) -> Result<Self, JobError> {
        Ok(Self {
            stack: StackRef::parse(stack)?,
            branch: branch.into(),
            provider: Provider::default(),
        })
    }

    pub fn stack(&self) -> &StackRef {
        &self.stack
    }

    pub async fn run<S: StackService>(&self, service: &S) -> Result<ValidationReport, JobError> {
        let (clone, repository) =
            clone_stack(service, self.provider, &self.stack, &self.branch).await?;

        info!(stack = %self.stack, "Sending order to validate stack");
        let validation = service
            .validate_stack(&repository, &repository.stack_name())
            .await?;
        if validation.is_failure() {
            validation.diagnostic.log();
            return Err(JobError::RemoteSeverity {
                operation: StackOperation::Validate,
                diagnostic: validation.diagnostic,
            });
        }

        let report = ValidationReport {
            clone,
            repository,
            validation,
        };
        info!(stack = %self.stack, summary = %report.summary(), "Validation finished");
        Ok(report)
    }
}

// ── Deployment ───────────────────────────────────────────────────────────

/// Outcome of a deployment that finished below ERROR.
#[derive(Debug, Clone)]
pub struct DeploymentReport {
    pub clone: ResultWithDiagnostic<Repository>,
    pub repository: Repository,
    pub outcome: JobOutcome,
    pub aggregator: Arc<ResultAggregator>,
}

impl DeploymentReport {
    pub fn summary(&self) -> String {
        self.outcome.result.diagnostic.summary()
    }

    pub fn host_entries(&self) -> Arc<[HostEntry]> {
        self.aggregator.list_host_entries()
    }

    pub fn stack_base(&self) -> String {
        self.repository.repository_base()
    }
}

/// Clones, submits and tracks a deployment.
///
/// The aggregator outlives a failed run, so callers can still show the log
/// and any topology the service returned.
#[derive(Debug)]
pub struct Deployer {
    stack: StackRef,
    branch: String,
    provider: Provider,
    mode: DeployMode,
    poller: PollerConfig,
    aggregator: Arc<ResultAggregator>,
    cancel: CancelHandle,
    events: Option<EventBus>,
}

impl Deployer {
    pub fn new(
        stack: &str,
        branch: impl Into<String>,
        poller: PollerConfig,
        policy: UnattachedPolicy,
    ) -> Result<Self, JobError> {
        Ok(Self {
            stack: StackRef::parse(stack)?,
            branch: branch.into(),
            provider: Provider::default(),
            mode: DeployMode::default(),
            poller,
            aggregator: Arc::new(ResultAggregator::new(policy)),
            cancel: CancelHandle::new(),
            events: None,
        })
    }

    pub fn with_mode(mut self, mode: DeployMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn stack(&self) -> &StackRef {
        &self.stack
    }

    pub fn aggregator(&self) -> &Arc<ResultAggregator> {
        &self.aggregator
    }

    /// Handle that stops the poll loop from another task.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub async fn run<S: StackService>(&self, service: &S) -> Result<DeploymentReport, JobError> {
        let (clone, repository) =
            clone_stack(service, self.provider, &self.stack, &self.branch).await?;

        let mut poller = JobPoller::new(self.poller, Arc::clone(&self.aggregator))
            .with_cancel_handle(self.cancel.clone());
        if let Some(events) = &self.events {
            poller = poller.with_events(events.clone());
        }

        info!(stack = %self.stack, dry_run = self.mode.dry_run, "Sending order to deploy stack");
        let outcome = poller
            .run(service, &repository, &repository.stack_name(), self.mode)
            .await?;

        Ok(DeploymentReport {
            clone,
            repository,
            outcome,
            aggregator: Arc::clone(&self.aggregator),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::CatalogGraph;
    use crate::diagnostic::Diagnostic;
    use crate::job::{JobState, LogEntry, PollResult};
    use crate::scripted::{FailurePoint, ScriptedStackService};

    fn deployer(service_stack: &str) -> Deployer {
        Deployer::new(
            service_stack,
            "main",
            PollerConfig::from_secs(1, None),
            UnattachedPolicy::default(),
        )
        .unwrap()
    }

    #[test]
    fn bad_stack_names_are_rejected_up_front() {
        let err = Validator::new("webshop", "main").err().unwrap();
        assert!(matches!(err, JobError::InvalidStack(_)));
        assert_eq!(
            Deployer::new("", "main", PollerConfig::from_secs(1, None), UnattachedPolicy::default())
                .err()
                .unwrap()
                .to_string(),
            "Please specify a stack"
        );
    }

    #[tokio::test]
    async fn validation_returns_graph_and_summary() {
        let service = ScriptedStackService::builder()
            .validation(ResultWithDiagnostic::new(
                Diagnostic::ok("validate")
                    .with_child(Diagnostic::new(Severity::Warning, "unused param")),
                Some("PHN2Zz48L3N2Zz4=".to_string()),
            ))
            .build();

        let report = Validator::new("cloudsmith/webshop", "main")
            .unwrap()
            .run(&service)
            .await
            .unwrap();
        assert_eq!(report.summary(), "1 warning");
        assert_eq!(report.severity(), Severity::Warning);
        assert_eq!(report.graph_payload(), Some("PHN2Zz48L3N2Zz4="));
        assert_eq!(report.decode_graph().unwrap().unwrap(), b"<svg></svg>");
        assert_eq!(
            report.stack_base(),
            "https://github.com/cloudsmith/webshop/tree/main"
        );
    }

    #[tokio::test]
    async fn clone_error_stops_before_validation() {
        let service = ScriptedStackService::builder()
            .clone_result(ResultWithDiagnostic::failure(
                Diagnostic::ok("clone").with_child(Diagnostic::error("no such branch")),
            ))
            .fail_on(FailurePoint::Validate)
            .build();

        let err = Validator::new("cloudsmith/webshop", "nope")
            .unwrap()
            .run(&service)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            JobError::RemoteSeverity {
                operation: StackOperation::Clone,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn validation_error_is_reported_verbatim() {
        let diagnostic = Diagnostic::ok("validate").with_child(Diagnostic::error("cycle"));
        let service = ScriptedStackService::builder()
            .validation(ResultWithDiagnostic::failure(diagnostic.clone()))
            .build();

        let err = Validator::new("cloudsmith/webshop", "main")
            .unwrap()
            .run(&service)
            .await
            .unwrap_err();
        assert_eq!(err.diagnostic(), Some(&diagnostic));
        assert_eq!(err.code().code_string(), "SH-E301");
    }

    #[tokio::test(start_paused = true)]
    async fn deployment_collects_hosts() {
        let service = ScriptedStackService::builder()
            .poll(PollResult::with_entries(
                JobState::Running,
                vec![
                    LogEntry::new("one").with_logical("web1"),
                    LogEntry::new("two").with_physical("m-42"),
                ],
            ))
            .poll(PollResult::new(JobState::Succeeded))
            .result(ResultWithDiagnostic::success(
                "deployed",
                vec![
                    CatalogGraph::new("web1", Some("m-1".to_string())),
                    CatalogGraph::new("db1", Some("m-2".to_string())),
                ],
            ))
            .build();

        let report = deployer("cloudsmith/webshop")
            .with_mode(DeployMode::dry_run())
            .run(&service)
            .await
            .unwrap();

        assert_eq!(report.summary(), "No errors or warnings");
        let names: Vec<_> = report
            .host_entries()
            .iter()
            .map(HostEntry::display_name)
            .collect();
        assert_eq!(names, vec!["web1[m-1]", "db1[m-2]", "unknown[m-42]"]);
        assert_eq!(service.deploy_modes(), vec![DeployMode::dry_run()]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_deployment_keeps_aggregator_readable() {
        let service = ScriptedStackService::builder()
            .poll(PollResult::with_entries(
                JobState::Failed,
                vec![LogEntry::new("apt failed").with_logical("web1")],
            ))
            .result(ResultWithDiagnostic::new(
                Diagnostic::ok("deploy").with_child(Diagnostic::error("apt failed")),
                Some(vec![CatalogGraph::new("web1", None)]),
            ))
            .build();

        let deployer = deployer("cloudsmith/webshop");
        let err = deployer.run(&service).await.unwrap_err();
        assert_eq!(err.code().code_string(), "SH-E302");
        assert_eq!(deployer.aggregator().list_host_entries().len(), 1);
        assert_eq!(deployer.aggregator().effective_severity(), Severity::Error);
    }
}
