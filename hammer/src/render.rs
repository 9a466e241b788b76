//! Human and JSON renderings of reports.

use hammer_common::util::indent_lines;
use hammer_common::{Diagnostic, HostEntry, JobOutcome, Severity};
use serde_json::{Value, json};

pub fn print_diagnostic(title: &str, diagnostic: &Diagnostic) {
    println!("{title}:");
    println!("{}", indent_lines(&diagnostic.render(), "  "));
}

/// One row per host: name, machine, log line count, graph path.
pub fn print_hosts(hosts: &[HostEntry]) {
    if hosts.is_empty() {
        println!("No hosts reported.");
        return;
    }

    let name_width = hosts
        .iter()
        .map(|host| host.name().len())
        .chain(std::iter::once("HOST".len()))
        .max()
        .unwrap_or(4);
    let machine_width = hosts
        .iter()
        .map(|host| host.machine_name().map_or(1, str::len))
        .chain(std::iter::once("MACHINE".len()))
        .max()
        .unwrap_or(7);

    println!(
        "{:<name_width$}  {:<machine_width$}  {:>5}  GRAPH",
        "HOST", "MACHINE", "LINES"
    );
    for host in hosts {
        println!(
            "{:<name_width$}  {:<machine_width$}  {:>5}  {}",
            host.name(),
            host.machine_name().unwrap_or("-"),
            host.log_entry_count(),
            host.catalog_graph_path().as_deref().unwrap_or("-"),
        );
    }
}

/// Log lines of every host that reported WARNING or worse.
pub fn print_host_problems(hosts: &[HostEntry]) {
    for host in hosts {
        let problems: Vec<_> = host
            .log_entries()
            .iter()
            .filter(|entry| entry.severity >= Severity::Warning)
            .collect();
        if problems.is_empty() {
            continue;
        }
        println!("{}:", host.title());
        for entry in problems {
            println!("  {entry}");
        }
    }
}

pub fn outcome_json(outcome: &JobOutcome, summary: &str, hosts: &[HostEntry]) -> Value {
    json!({
        "job_id": outcome.job_id,
        "state": outcome.final_state,
        "severity": outcome.severity,
        "summary": summary,
        "polls": outcome.polls,
        "elapsed_ms": outcome.elapsed.as_millis() as u64,
        "diagnostic": outcome.result.diagnostic,
        "hosts": hosts,
    })
}
