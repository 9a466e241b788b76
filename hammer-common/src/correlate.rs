//! Host correlation for the flat job log.
//!
//! The service tags every log line with whatever origin it knows about: the
//! logical topology node, the physical machine, both, or neither. The
//! correlator keeps the cumulative log and derives two indices from it:
//!
//! - lines per logical host (any line with a logical origin), and
//! - lines per unattached machine (a physical origin but no logical origin,
//!   i.e. machines not or no longer bound to a named node).
//!
//! Both indices are memoized and thrown away on every append. The next read
//! rebuilds them from the full log, so a reader never sees an index built from
//! part of the log.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

use crate::job::LogEntry;

/// Host name used for lines from machines with no logical host.
pub const UNKNOWN_HOST: &str = "unknown";

/// How lines from unattached machines are presented as hosts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnattachedPolicy {
    /// One `"unknown"` host per machine, carrying the machine name.
    #[default]
    UnknownHost,
    /// The machine name doubles as the host name.
    ///
    /// A logical host that happens to share the machine's name is kept as a
    /// separate entry; the two differ in [`display_name`] (`m-1` versus
    /// `m-1[m-1]`), which is what host lookups key on.
    ///
    /// [`display_name`]: crate::aggregate::HostEntry::display_name
    MachineName,
}

impl UnattachedPolicy {
    /// Host name to report for an unattached machine.
    pub fn host_name<'a>(self, machine: &'a str) -> &'a str {
        match self {
            Self::UnknownHost => UNKNOWN_HOST,
            Self::MachineName => machine,
        }
    }
}

impl std::fmt::Display for UnattachedPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownHost => write!(f, "unknown_host"),
            Self::MachineName => write!(f, "machine_name"),
        }
    }
}

impl std::str::FromStr for UnattachedPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "unknown_host" | "unknown" => Ok(Self::UnknownHost),
            "machine_name" | "machine" => Ok(Self::MachineName),
            other => Err(format!("unknown unattached policy '{other}'")),
        }
    }
}

// ── Grouping ─────────────────────────────────────────────────────────────

/// Log entries grouped by key, iterating in first-seen key order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogGroups {
    index: HashMap<String, usize>,
    groups: Vec<(String, Vec<LogEntry>)>,
}

impl LogGroups {
    fn push(&mut self, key: &str, entry: LogEntry) {
        match self.index.get(key) {
            Some(&slot) => self.groups[slot].1.push(entry),
            None => {
                self.index.insert(key.to_string(), self.groups.len());
                self.groups.push((key.to_string(), vec![entry]));
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&[LogEntry]> {
        self.index
            .get(key)
            .map(|&slot| self.groups[slot].1.as_slice())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|(key, _)| key.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[LogEntry])> {
        self.groups
            .iter()
            .map(|(key, entries)| (key.as_str(), entries.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

// ── Correlator ───────────────────────────────────────────────────────────

/// Cumulative job log with lazily rebuilt host indices.
#[derive(Debug, Clone, Default)]
pub struct LogCorrelator {
    entries: Vec<LogEntry>,
    by_logical_host: Option<Arc<LogGroups>>,
    by_unattached_machine: Option<Arc<LogGroups>>,
}

impl LogCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a batch and drop both indices. Returns the number of entries
    /// appended; an empty batch leaves the indices intact.
    pub fn append(&mut self, batch: impl IntoIterator<Item = LogEntry>) -> usize {
        let before = self.entries.len();
        self.entries.extend(batch);
        let added = self.entries.len() - before;
        if added > 0 {
            self.invalidate();
        }
        added
    }

    fn invalidate(&mut self) {
        self.by_logical_host = None;
        self.by_unattached_machine = None;
    }

    /// The raw log, global lines included.
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries per logical host, in arrival order.
    pub fn by_logical_host(&mut self) -> Arc<LogGroups> {
        let entries = &self.entries;
        self.by_logical_host
            .get_or_insert_with(|| {
                let mut groups = LogGroups::default();
                for entry in entries {
                    if let Some(host) = entry.logical_origin.as_deref() {
                        groups.push(host, entry.clone());
                    }
                }
                trace!(hosts = groups.len(), "Rebuilt logical host index");
                Arc::new(groups)
            })
            .clone()
    }

    /// Entries per machine, restricted to lines with no logical origin.
    pub fn by_unattached_machine(&mut self) -> Arc<LogGroups> {
        let entries = &self.entries;
        self.by_unattached_machine
            .get_or_insert_with(|| {
                let mut groups = LogGroups::default();
                for entry in entries {
                    if entry.logical_origin.is_some() {
                        continue;
                    }
                    if let Some(machine) = entry.physical_origin.as_deref() {
                        groups.push(machine, entry.clone());
                    }
                }
                trace!(machines = groups.len(), "Rebuilt unattached machine index");
                Arc::new(groups)
            })
            .clone()
    }
}
