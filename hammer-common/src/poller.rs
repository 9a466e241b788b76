//! Drives a remote deployment job to completion.
//!
//! The loop polls on a fixed cadence anchored to the start of the previous
//! poll, so the time a poll takes to process never shifts later polls. The
//! only suspension point is the wait for the next poll slot, which is cut
//! short by the wall-clock budget and by the caller's cancel flag. A poll
//! taken at the deadline is the last one: a job still running after it has
//! timed out.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use crate::aggregate::{DeploymentResult, ResultAggregator};
use crate::diagnostic::Severity;
use crate::errors::{JobError, StackOperation};
use crate::events::{EventBus, JobEvent};
use crate::job::{DeployMode, JobId, JobState, LogEntry};
use crate::service::{Repository, StackService};

/// Shortest allowed spacing between two polls.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

// ── Configuration ────────────────────────────────────────────────────────

/// Immutable polling policy, fixed when the poller is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    poll_interval: Duration,
    max_time: Option<Duration>,
}

impl PollerConfig {
    /// Build from raw second counts. Intervals below one second become one
    /// second; a max time of zero or less means no limit.
    pub fn from_secs(poll_interval_secs: i64, max_time_secs: Option<i64>) -> Self {
        let poll_interval = u64::try_from(poll_interval_secs)
            .map(Duration::from_secs)
            .unwrap_or(MIN_POLL_INTERVAL);
        let max_time = max_time_secs
            .and_then(|secs| u64::try_from(secs).ok())
            .map(Duration::from_secs);
        Self::new(poll_interval, max_time)
    }

    pub fn new(poll_interval: Duration, max_time: Option<Duration>) -> Self {
        Self {
            poll_interval: poll_interval.max(MIN_POLL_INTERVAL),
            max_time: max_time.filter(|budget| !budget.is_zero()),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Overall budget for the poll loop, `None` when unbounded.
    pub fn max_time(&self) -> Option<Duration> {
        self.max_time
    }
}

// ── Cancellation ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct CancelState {
    requested: AtomicBool,
    notify: Notify,
}

/// Cooperative stop request shared between the poller and its caller.
///
/// Cancelling only stops the local loop; the remote job keeps running.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    inner: Arc<CancelState>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.requested.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    /// Resolves once [`CancelHandle::cancel`] has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

// ── Outcome ──────────────────────────────────────────────────────────────

/// Summary of a job that ran to a non-cancelled terminal state.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job_id: JobId,
    pub final_state: JobState,
    pub polls: u32,
    pub elapsed: Duration,
    /// Effective severity of the deployment result (below ERROR).
    pub severity: Severity,
    pub result: DeploymentResult,
}

// ── Poller ───────────────────────────────────────────────────────────────

/// Submits a deployment and polls it until it finishes.
#[derive(Debug)]
pub struct JobPoller {
    config: PollerConfig,
    aggregator: Arc<ResultAggregator>,
    cancel: CancelHandle,
    events: Option<EventBus>,
}

impl JobPoller {
    pub fn new(config: PollerConfig, aggregator: Arc<ResultAggregator>) -> Self {
        Self {
            config,
            aggregator,
            cancel: CancelHandle::new(),
            events: None,
        }
    }

    /// Publish lifecycle events on the given bus.
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Share an existing cancel handle instead of a fresh one.
    pub fn with_cancel_handle(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn config(&self) -> PollerConfig {
        self.config
    }

    pub fn aggregator(&self) -> &Arc<ResultAggregator> {
        &self.aggregator
    }

    fn publish(&self, event: JobEvent) {
        if let Some(events) = &self.events {
            events.publish(&event);
        }
    }

    /// Submit a deployment of `stack` and track it to completion.
    pub async fn run<S: StackService>(
        &self,
        service: &S,
        repository: &Repository,
        stack: &str,
        mode: DeployMode,
    ) -> Result<JobOutcome, JobError> {
        let job_id = service.deploy_stack(repository, stack, mode).await?;
        info!(job_id = %job_id, stack, dry_run = mode.dry_run, "Deployment job submitted");
        self.publish(JobEvent::Submitted {
            job_id: job_id.clone(),
            stack: stack.to_string(),
            dry_run: mode.dry_run,
        });

        let outcome = self.track(service, job_id.clone()).await;
        if let Err(err) = &outcome {
            self.publish(JobEvent::Failed {
                job_id,
                code: err.code().code_string(),
                error: err.to_string(),
            });
        }
        outcome
    }

    /// Poll an already submitted job until it finishes.
    pub async fn track<S: StackService>(
        &self,
        service: &S,
        job_id: JobId,
    ) -> Result<JobOutcome, JobError> {
        let start_time = Instant::now();
        let deadline = self.config.max_time.map(|budget| start_time + budget);
        let mut last_poll_time = start_time;
        let mut state = JobState::Scheduled;
        let mut polls: u32 = 0;

        loop {
            self.check_cancelled(&job_id)?;
            self.check_deadline(&job_id, deadline)?;

            // Never sleep past the budget; the poll at the deadline is the last one.
            let next_poll = last_poll_time + self.config.poll_interval;
            let wake = deadline.map_or(next_poll, |deadline| next_poll.min(deadline));
            if wake > Instant::now() {
                tokio::select! {
                    _ = sleep_until(wake) => {}
                    _ = self.cancel.cancelled() => {}
                }
                self.check_cancelled(&job_id)?;
            }

            last_poll_time = Instant::now();
            let poll = service.poll_job(&job_id).await?;
            polls += 1;

            if !state.can_transition_to(poll.state) {
                warn!(job_id = %job_id, from = %state, to = %poll.state, "Unexpected job state transition");
            }
            state = poll.state;

            let entries = poll.log_entries.len();
            self.forward(&job_id, poll.log_entries);
            debug!(job_id = %job_id, state = %state, entries, polls, "Polled job");
            self.publish(JobEvent::Polled {
                job_id: job_id.clone(),
                state,
                entries,
                poll: polls,
            });

            match state {
                JobState::Scheduled | JobState::Starting | JobState::Sleeping | JobState::Running => {
                    if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                        return Err(self.timeout(&job_id));
                    }
                }
                JobState::Cancelled => {
                    warn!(job_id = %job_id, "Job was cancelled");
                    return Err(JobError::JobCancelled { job_id });
                }
                JobState::Succeeded | JobState::Failed => break,
            }
        }

        let result = service.fetch_deployment_result(&job_id).await?;
        let severity = result.effective_severity();
        self.aggregator.set_deployment_result(result.clone());

        let elapsed = start_time.elapsed();
        info!(
            job_id = %job_id,
            state = %state,
            severity = %severity,
            polls,
            elapsed_ms = elapsed.as_millis() as u64,
            "Job finished"
        );
        self.publish(JobEvent::Finished {
            job_id: job_id.clone(),
            state,
            severity,
            polls,
            elapsed_ms: elapsed.as_millis() as u64,
        });

        if severity.is_failure() {
            return Err(JobError::RemoteSeverity {
                operation: StackOperation::Deploy,
                diagnostic: result.diagnostic,
            });
        }

        Ok(JobOutcome {
            job_id,
            final_state: state,
            polls,
            elapsed,
            severity,
            result,
        })
    }

    fn check_cancelled(&self, job_id: &JobId) -> Result<(), JobError> {
        if self.cancel.is_cancelled() {
            info!(job_id = %job_id, "Polling aborted by caller");
            return Err(JobError::Aborted {
                job_id: job_id.clone(),
            });
        }
        Ok(())
    }

    fn check_deadline(&self, job_id: &JobId, deadline: Option<Instant>) -> Result<(), JobError> {
        match deadline {
            Some(deadline) if Instant::now() > deadline => Err(self.timeout(job_id)),
            _ => Ok(()),
        }
    }

    fn timeout(&self, job_id: &JobId) -> JobError {
        let budget = self.config.max_time.unwrap_or_default();
        warn!(job_id = %job_id, budget_secs = budget.as_secs(), "Job didn't finish in time");
        JobError::TimeoutExceeded {
            job_id: job_id.clone(),
            budget,
        }
    }

    fn forward(&self, job_id: &JobId, entries: Vec<LogEntry>) {
        if entries.is_empty() {
            return;
        }
        for entry in &entries {
            info!(target: "hammer::job_log", job_id = %job_id, "{}", entry);
        }
        self.aggregator.add_log_entries(entries);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::CatalogGraph;
    use crate::diagnostic::{Diagnostic, ResultWithDiagnostic};
    use crate::scripted::{FailurePoint, ScriptedStackService};
    use crate::service::Provider;

    fn repo() -> Repository {
        Repository {
            provider: Provider::Github,
            owner: "cloudsmith".to_string(),
            name: "webshop".to_string(),
            branch: "main".to_string(),
        }
    }

    fn running() -> crate::job::PollResult {
        crate::job::PollResult::new(JobState::Running)
    }

    fn poller(interval: u64, max_time: Option<u64>) -> JobPoller {
        JobPoller::new(
            PollerConfig::new(Duration::from_secs(interval), max_time.map(Duration::from_secs)),
            Arc::new(ResultAggregator::default()),
        )
    }

    #[test]
    fn config_clamps_interval_and_ignores_zero_budget() {
        let config = PollerConfig::from_secs(0, Some(0));
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.max_time(), None);

        let config = PollerConfig::from_secs(-5, Some(-1));
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.max_time(), None);

        let config = PollerConfig::from_secs(15, Some(600));
        assert_eq!(config.poll_interval(), Duration::from_secs(15));
        assert_eq!(config.max_time(), Some(Duration::from_secs(600)));

        let config = PollerConfig::new(Duration::from_millis(200), None);
        assert_eq!(config.poll_interval(), MIN_POLL_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_polls_do_not_drift_with_processing_time() {
        let service = ScriptedStackService::builder()
            .polls(vec![running(), running(), running(), running(), running()])
            .poll(crate::job::PollResult::new(JobState::Succeeded))
            .poll_delays(vec![
                Duration::ZERO,
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_millis(1500),
                Duration::from_secs(3),
                Duration::ZERO,
            ])
            .result(ResultWithDiagnostic::success("deployed", Vec::new()))
            .build();

        let poller = poller(5, None);
        let outcome = poller
            .run(&service, &repo(), "cloudsmith/webshop", DeployMode::default())
            .await
            .expect("job should succeed");
        assert_eq!(outcome.polls, 6);
        assert_eq!(outcome.final_state, JobState::Succeeded);

        let times = service.poll_times();
        assert_eq!(times.len(), 6);
        for pair in times.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::from_secs(5));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_poll_makes_next_poll_immediate() {
        let service = ScriptedStackService::builder()
            .poll(running())
            .poll(crate::job::PollResult::new(JobState::Succeeded))
            .poll_delays(vec![Duration::from_secs(8), Duration::ZERO])
            .result(ResultWithDiagnostic::success("deployed", Vec::new()))
            .build();

        poller(5, None)
            .run(&service, &repo(), "cloudsmith/webshop", DeployMode::default())
            .await
            .expect("job should succeed");

        let times = service.poll_times();
        assert_eq!(times[1] - times[0], Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn never_ending_job_times_out_and_stops_polling() {
        let service = ScriptedStackService::builder().poll(running()).build();
        let started = Instant::now();

        let err = poller(5, Some(30))
            .run(&service, &repo(), "cloudsmith/webshop", DeployMode::default())
            .await
            .expect_err("job should time out");

        assert!(matches!(err, JobError::TimeoutExceeded { budget, .. } if budget == Duration::from_secs(30)));
        assert_eq!(started.elapsed(), Duration::from_secs(30));
        let last_poll = *service.poll_times().last().unwrap();
        assert!(last_poll - started <= Duration::from_secs(30));
        assert_eq!(service.poll_count(), 6);
        assert_eq!(service.fetch_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn budget_shorter_than_interval_polls_once_at_deadline() {
        let service = ScriptedStackService::builder().poll(running()).build();
        let started = Instant::now();

        let err = poller(60, Some(5))
            .run(&service, &repo(), "cloudsmith/webshop", DeployMode::default())
            .await
            .expect_err("job should time out");

        assert!(matches!(err, JobError::TimeoutExceeded { .. }));
        assert_eq!(started.elapsed(), Duration::from_secs(5));
        assert_eq!(service.poll_count(), 1);
        assert_eq!(service.fetch_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn job_finished_by_the_deadline_is_not_a_timeout() {
        let service = ScriptedStackService::builder()
            .poll(crate::job::PollResult::new(JobState::Succeeded))
            .result(ResultWithDiagnostic::success("deployed", Vec::new()))
            .build();

        let outcome = poller(60, Some(5))
            .run(&service, &repo(), "cloudsmith/webshop", DeployMode::default())
            .await
            .expect("finished job should succeed");

        assert_eq!(outcome.polls, 1);
        assert_eq!(outcome.elapsed, Duration::from_secs(5));
        assert_eq!(service.fetch_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_cancel_never_fetches_result() {
        let service = ScriptedStackService::builder()
            .poll(crate::job::PollResult::with_entries(
                JobState::Running,
                vec![LogEntry::new("installing").with_logical("web1")],
            ))
            .poll(crate::job::PollResult::new(JobState::Cancelled))
            .result(ResultWithDiagnostic::success("deployed", Vec::new()))
            .build();
        let poller = poller(1, None);

        let err = poller
            .run(&service, &repo(), "cloudsmith/webshop", DeployMode::default())
            .await
            .expect_err("job should be cancelled");

        assert!(matches!(err, JobError::JobCancelled { .. }));
        assert_eq!(service.fetch_count(), 0);
        assert_eq!(poller.aggregator().log_len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_delivered_while_scheduled_are_kept() {
        let service = ScriptedStackService::builder()
            .poll(crate::job::PollResult::with_entries(
                JobState::Scheduled,
                vec![LogEntry::new("queued").with_physical("m-1")],
            ))
            .poll(crate::job::PollResult::new(JobState::Starting))
            .poll(crate::job::PollResult::with_entries(
                JobState::Succeeded,
                vec![LogEntry::new("done").with_logical("web1")],
            ))
            .result(ResultWithDiagnostic::success(
                "deployed",
                vec![CatalogGraph::new("web1", Some("m-1".to_string()))],
            ))
            .build();
        let poller = poller(1, None);

        let outcome = poller
            .run(&service, &repo(), "cloudsmith/webshop", DeployMode::dry_run())
            .await
            .expect("job should succeed");

        assert_eq!(outcome.polls, 3);
        let raw = poller.aggregator().raw_log();
        let messages: Vec<_> = raw.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["queued", "done"]);
        assert_eq!(poller.aggregator().list_host_entries().len(), 2);
        assert_eq!(service.deploy_modes(), vec![DeployMode::dry_run()]);
    }

    #[tokio::test(start_paused = true)]
    async fn error_result_fails_after_storing_topology() {
        let diagnostic = Diagnostic::ok("deploy").with_child(Diagnostic::error("package failed"));
        let service = ScriptedStackService::builder()
            .poll(crate::job::PollResult::new(JobState::Failed))
            .result(ResultWithDiagnostic::new(
                diagnostic.clone(),
                Some(vec![CatalogGraph::new("web1", None)]),
            ))
            .build();
        let poller = poller(1, None);

        let err = poller
            .run(&service, &repo(), "cloudsmith/webshop", DeployMode::default())
            .await
            .expect_err("error diagnostics should fail the job");

        assert_eq!(err.diagnostic(), Some(&diagnostic));
        assert_eq!(poller.aggregator().effective_severity(), Severity::Error);
        assert_eq!(poller.aggregator().list_host_entries().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn warnings_do_not_fail_the_job() {
        let service = ScriptedStackService::builder()
            .poll(crate::job::PollResult::new(JobState::Succeeded))
            .result(ResultWithDiagnostic::new(
                Diagnostic::ok("deploy").with_child(Diagnostic::new(Severity::Warning, "slow")),
                Some(Vec::new()),
            ))
            .build();

        let outcome = poller(1, None)
            .run(&service, &repo(), "cloudsmith/webshop", DeployMode::default())
            .await
            .expect("warnings never abort");
        assert_eq!(outcome.severity, Severity::Warning);
    }

    #[tokio::test(start_paused = true)]
    async fn caller_cancel_wakes_the_sleep() {
        let service = ScriptedStackService::builder().poll(running()).build();
        let poller = poller(5, None);
        let handle = poller.cancel_handle();
        let started = Instant::now();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(7)).await;
            handle.cancel();
        });

        let err = poller
            .run(&service, &repo(), "cloudsmith/webshop", DeployMode::default())
            .await
            .expect_err("cancel should abort");

        assert!(matches!(err, JobError::Aborted { .. }));
        assert_eq!(service.poll_count(), 1);
        assert_eq!(started.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_is_not_retried() {
        let service = ScriptedStackService::builder()
            .poll(running())
            .fail_on(FailurePoint::Poll(2))
            .build();

        let err = poller(1, None)
            .run(&service, &repo(), "cloudsmith/webshop", DeployMode::default())
            .await
            .expect_err("transport failure should surface");

        assert!(matches!(err, JobError::Transport(_)));
        assert_eq!(service.poll_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn lifecycle_events_are_published() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let service = ScriptedStackService::builder()
            .job_id("job-42")
            .poll(crate::job::PollResult::new(JobState::Succeeded))
            .result(ResultWithDiagnostic::success("deployed", Vec::new()))
            .build();

        poller(1, None)
            .with_events(bus)
            .run(&service, &repo(), "cloudsmith/webshop", DeployMode::default())
            .await
            .expect("job should succeed");

        let mut names = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            let parsed: serde_json::Value = serde_json::from_str(&msg).unwrap();
            assert_eq!(parsed["data"]["job_id"], "job-42");
            names.push(parsed["event"].as_str().unwrap().to_string());
        }
        assert_eq!(names, vec!["job_submitted", "job_polled", "job_finished"]);
    }
}
