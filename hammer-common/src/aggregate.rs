//! Per-host view of a deployment.
//!
//! The aggregator is the only producer of [`HostEntry`] values. It merges the
//! correlated job log with the topology (catalog graphs) returned when the job
//! finishes, and memoizes the resulting list until either input changes.
//!
//! One writer (the poller) and any number of readers share an aggregator.
//! Appending entries, storing the topology, invalidating the memo and
//! rebuilding it all happen under one lock; readers get an immutable
//! `Arc<[HostEntry]>` snapshot.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::correlate::{LogCorrelator, UnattachedPolicy};
use crate::diagnostic::{ResultWithDiagnostic, Severity};
use crate::job::LogEntry;

/// Topology snapshot for one logical host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogGraph {
    /// Logical host the graph belongs to.
    pub node_name: String,
    /// Machine currently backing the host, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    /// Base64-encoded SVG image, as delivered by the service.
    #[serde(default)]
    pub graph_payload: String,
}

impl CatalogGraph {
    pub fn new(node_name: impl Into<String>, instance_id: Option<String>) -> Self {
        Self {
            node_name: node_name.into(),
            instance_id,
            graph_payload: String::new(),
        }
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.graph_payload = payload.into();
        self
    }

    /// Decode the image payload.
    pub fn decode_payload(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(self.graph_payload.trim())
    }
}

/// Everything known about one host of a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostEntry {
    name: String,
    machine_name: Option<String>,
    catalog_graph: Option<CatalogGraph>,
    log_entries: Vec<LogEntry>,
}

impl HostEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn machine_name(&self) -> Option<&str> {
        self.machine_name.as_deref()
    }

    pub fn catalog_graph(&self) -> Option<&CatalogGraph> {
        self.catalog_graph.as_ref()
    }

    pub fn log_entries(&self) -> &[LogEntry] {
        &self.log_entries
    }

    pub fn log_entry_count(&self) -> usize {
        self.log_entries.len()
    }

    /// `name[machine]`, or just `name` when the machine is unknown.
    pub fn display_name(&self) -> String {
        match &self.machine_name {
            Some(machine) => format!("{}[{}]", self.name, machine),
            None => self.name.clone(),
        }
    }

    pub fn title(&self) -> String {
        format!("Host \"{}\"", self.display_name())
    }

    /// Relative path under which the host's graph is served, if it has one.
    pub fn catalog_graph_path(&self) -> Option<String> {
        self.catalog_graph
            .as_ref()
            .map(|_| format!("catalogGraph/{}", self.display_name()))
    }
}

pub type DeploymentResult = ResultWithDiagnostic<Vec<CatalogGraph>>;

// ── Aggregator ───────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct AggregatorState {
    correlator: LogCorrelator,
    deployment: Option<DeploymentResult>,
    hosts: Option<Arc<[HostEntry]>>,
}

/// Thread-safe merge of job log and topology into host entries.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    policy: UnattachedPolicy,
    state: Mutex<AggregatorState>,
}

impl ResultAggregator {
    pub fn new(policy: UnattachedPolicy) -> Self {
        Self {
            policy,
            state: Mutex::new(AggregatorState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AggregatorState> {
        // Every critical section leaves the state consistent, so a panic in
        // another holder does not invalidate it.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append new log entries. Never replaces earlier ones.
    pub fn add_log_entries(&self, batch: Vec<LogEntry>) -> usize {
        let mut state = self.lock();
        let added = state.correlator.append(batch);
        if added > 0 {
            state.hosts = None;
        }
        added
    }

    /// Store the final topology result of the job.
    pub fn set_deployment_result(&self, result: DeploymentResult) {
        let mut state = self.lock();
        state.deployment = Some(result);
        state.hosts = None;
    }

    pub fn deployment_result(&self) -> Option<DeploymentResult> {
        self.lock().deployment.clone()
    }

    /// Severity of the deployment result; `Ok` until it arrives.
    pub fn effective_severity(&self) -> Severity {
        self.lock()
            .deployment
            .as_ref()
            .map(DeploymentResult::effective_severity)
            .unwrap_or_default()
    }

    /// Copy of the raw log.
    pub fn raw_log(&self) -> Vec<LogEntry> {
        self.lock().correlator.entries().to_vec()
    }

    pub fn log_len(&self) -> usize {
        self.lock().correlator.len()
    }

    /// Ordered per-host view, rebuilt only when inputs changed.
    pub fn list_host_entries(&self) -> Arc<[HostEntry]> {
        let mut state = self.lock();
        if let Some(hosts) = &state.hosts {
            return Arc::clone(hosts);
        }
        let hosts: Arc<[HostEntry]> = build_host_entries(&mut state, self.policy).into();
        debug!(hosts = hosts.len(), "Rebuilt host entries");
        state.hosts = Some(Arc::clone(&hosts));
        hosts
    }

    /// Look up a host by its display name (`name[machine]` or `name`).
    pub fn host_entry(&self, display_name: &str) -> Option<HostEntry> {
        self.list_host_entries()
            .iter()
            .find(|host| host.display_name() == display_name)
            .cloned()
    }
}

fn build_host_entries(state: &mut AggregatorState, policy: UnattachedPolicy) -> Vec<HostEntry> {
    let by_host = state.correlator.by_logical_host();
    let by_machine = state.correlator.by_unattached_machine();
    let graphs: &[CatalogGraph] = state
        .deployment
        .as_ref()
        .and_then(|d| d.result.as_deref())
        .unwrap_or(&[]);

    let mut result = Vec::with_capacity(by_host.len() + graphs.len() + by_machine.len());

    for (host, entries) in by_host.iter() {
        let graph = graphs.iter().find(|g| g.node_name == host);
        let machine_name = graph
            .and_then(|g| g.instance_id.clone())
            .or_else(|| {
                entries
                    .iter()
                    .find_map(|entry| entry.physical_origin.clone())
            });
        result.push(HostEntry {
            name: host.to_string(),
            machine_name,
            catalog_graph: graph.cloned(),
            log_entries: entries.to_vec(),
        });
    }

    // Hosts in the topology that have not logged anything yet.
    for graph in graphs {
        if by_host.contains_key(&graph.node_name) {
            continue;
        }
        result.push(HostEntry {
            name: graph.node_name.clone(),
            machine_name: graph.instance_id.clone(),
            catalog_graph: Some(graph.clone()),
            log_entries: Vec::new(),
        });
    }

    for (machine, entries) in by_machine.iter() {
        result.push(HostEntry {
            name: policy.host_name(machine).to_string(),
            machine_name: Some(machine.to_string()),
            catalog_graph: None,
            log_entries: entries.to_vec(),
        });
    }

    result
}
