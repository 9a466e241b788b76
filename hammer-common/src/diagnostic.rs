//! Hierarchical diagnostics with severity roll-up.
//!
//! Every remote operation (clone, validate, deploy, poll) reports its outcome
//! as a [`Diagnostic`] tree. Callers look at the effective severity of the
//! tree to decide whether to abort or continue.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{error, info, warn};

use crate::util::pluralize;

/// Ordered rank of a diagnostic outcome.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Ok,
    Info,
    Warning,
    Error,
    Fatal,
}

impl Severity {
    /// Returns true for severities that make a result unusable.
    pub fn is_failure(self) -> bool {
        self >= Severity::Error
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A single node in a diagnostic tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Diagnostic>,
}

impl Diagnostic {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            children: Vec::new(),
        }
    }

    pub fn ok(message: impl Into<String>) -> Self {
        Self::new(Severity::Ok, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    /// Append a child, keeping insertion order.
    pub fn add_child(&mut self, child: Diagnostic) {
        self.children.push(child);
    }

    /// Builder-style variant of [`Diagnostic::add_child`].
    pub fn with_child(mut self, child: Diagnostic) -> Self {
        self.add_child(child);
        self
    }

    /// Maximum severity over this node and all of its descendants.
    pub fn effective_severity(&self) -> Severity {
        self.children
            .iter()
            .map(Diagnostic::effective_severity)
            .fold(self.severity, Severity::max)
    }

    /// Multi-line rendering of the whole subtree, two spaces per level.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out, 0);
        out
    }

    fn render_into(&self, out: &mut String, depth: usize) {
        if !out.is_empty() {
            out.push('\n');
        }
        for _ in 0..depth {
            out.push_str("  ");
        }
        out.push_str(self.severity.label());
        out.push_str(": ");
        out.push_str(&self.message);
        for child in &self.children {
            child.render_into(out, depth + 1);
        }
    }

    /// Error and warning counts over the direct children, worded for a report
    /// headline (e.g. "2 errors and 1 warning").
    pub fn summary(&self) -> String {
        let (errors, warnings) =
            self.children
                .iter()
                .fold((0usize, 0usize), |(e, w), child| match child.severity {
                    Severity::Error | Severity::Fatal => (e + 1, w),
                    Severity::Warning => (e, w + 1),
                    _ => (e, w),
                });

        match (errors, warnings) {
            (0, 0) => "No errors or warnings".to_string(),
            (0, w) => pluralize(w, "warning"),
            (e, 0) => pluralize(e, "error"),
            (e, w) => format!("{} and {}", pluralize(e, "error"), pluralize(w, "warning")),
        }
    }

    /// Emit the tree through tracing, one event per node.
    pub fn log(&self) {
        self.log_at(0);
    }

    fn log_at(&self, depth: usize) {
        match self.severity {
            Severity::Ok | Severity::Info => info!(depth, "{}", self.message),
            Severity::Warning => warn!(depth, "{}", self.message),
            Severity::Error | Severity::Fatal => {
                error!(depth, severity = %self.severity, "{}", self.message)
            }
        }
        for child in &self.children {
            child.log_at(depth + 1);
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// A diagnostic paired with the (optional) value the operation produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultWithDiagnostic<T> {
    #[serde(flatten)]
    pub diagnostic: Diagnostic,
    pub result: Option<T>,
}

impl<T> ResultWithDiagnostic<T> {
    pub fn new(diagnostic: Diagnostic, result: Option<T>) -> Self {
        Self { diagnostic, result }
    }

    pub fn success(message: impl Into<String>, result: T) -> Self {
        Self::new(Diagnostic::ok(message), Some(result))
    }

    pub fn failure(diagnostic: Diagnostic) -> Self {
        Self::new(diagnostic, None)
    }

    pub fn effective_severity(&self) -> Severity {
        self.diagnostic.effective_severity()
    }

    pub fn is_failure(&self) -> bool {
        self.effective_severity().is_failure()
    }

    /// The result, unless the diagnostic says it must not be trusted.
    pub fn usable_result(&self) -> Option<&T> {
        if self.is_failure() {
            None
        } else {
            self.result.as_ref()
        }
    }

    pub fn children(&self) -> &[Diagnostic] {
        &self.diagnostic.children
    }
}

impl<T> fmt::Display for ResultWithDiagnostic<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.diagnostic, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn severity_strategy() -> impl Strategy<Value = Severity> {
        prop_oneof![
            Just(Severity::Ok),
            Just(Severity::Info),
            Just(Severity::Warning),
            Just(Severity::Error),
            Just(Severity::Fatal),
        ]
    }

    fn tree_strategy() -> impl Strategy<Value = Diagnostic> {
        let leaf = severity_strategy().prop_map(|s| Diagnostic::new(s, "leaf"));
        leaf.prop_recursive(4, 32, 4, |inner| {
            (severity_strategy(), prop::collection::vec(inner, 0..4)).prop_map(
                |(severity, children)| {
                    let mut node = Diagnostic::new(severity, "node");
                    for child in children {
                        node.add_child(child);
                    }
                    node
                },
            )
        })
    }

    #[test]
    fn severity_is_totally_ordered() {
        assert!(Severity::Ok < Severity::Info);
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Error);
        assert!(Severity::Error < Severity::Fatal);
        assert!(Severity::Error.is_failure());
        assert!(!Severity::Warning.is_failure());
    }

    #[test]
    fn effective_severity_rolls_up_from_grandchildren() {
        let mut root = Diagnostic::ok("clone");
        let mut child = Diagnostic::new(Severity::Info, "fetch");
        child.add_child(Diagnostic::new(Severity::Warning, "shallow history"));
        root.add_child(child);

        assert_eq!(root.severity, Severity::Ok);
        assert_eq!(root.effective_severity(), Severity::Warning);
    }

    #[test]
    fn render_lists_parents_before_children_in_order() {
        let root = Diagnostic::ok("deploy")
            .with_child(
                Diagnostic::new(Severity::Warning, "first")
                    .with_child(Diagnostic::new(Severity::Info, "nested")),
            )
            .with_child(Diagnostic::error("second"));

        assert_eq!(
            root.render(),
            "OK: deploy\n  WARNING: first\n    INFO: nested\n  ERROR: second"
        );
        assert_eq!(root.to_string(), root.render());
    }

    #[test]
    fn summary_matches_counts() {
        let empty = Diagnostic::ok("root");
        assert_eq!(empty.summary(), "No errors or warnings");

        let one_warning = Diagnostic::ok("root").with_child(Diagnostic::new(Severity::Warning, "w"));
        assert_eq!(one_warning.summary(), "1 warning");

        let mixed = Diagnostic::ok("root")
            .with_child(Diagnostic::error("e1"))
            .with_child(Diagnostic::new(Severity::Fatal, "e2"))
            .with_child(Diagnostic::new(Severity::Warning, "w"))
            .with_child(Diagnostic::new(Severity::Info, "i"));
        assert_eq!(mixed.summary(), "2 errors and 1 warning");

        let errors_only = Diagnostic::ok("root").with_child(Diagnostic::error("e"));
        assert_eq!(errors_only.summary(), "1 error");
    }

    #[test]
    fn usable_result_hidden_on_error() {
        let ok = ResultWithDiagnostic::success("cloned", 7);
        assert_eq!(ok.usable_result(), Some(&7));

        let mut diag = Diagnostic::ok("cloned");
        diag.add_child(Diagnostic::error("checkout failed"));
        let broken = ResultWithDiagnostic::new(diag, Some(7));
        assert!(broken.result.is_some());
        assert_eq!(broken.usable_result(), None);
    }

    #[test]
    fn result_with_diagnostic_parses_flattened_json() {
        let json = r#"{
            "severity": "warning",
            "message": "validated",
            "children": [{"severity": "info", "message": "3 nodes"}],
            "result": "PHN2Zz48L3N2Zz4="
        }"#;
        let parsed: ResultWithDiagnostic<String> = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.effective_severity(), Severity::Warning);
        assert_eq!(parsed.children().len(), 1);
        assert_eq!(parsed.usable_result().map(String::as_str), Some("PHN2Zz48L3N2Zz4="));
    }

    #[test]
    fn missing_result_key_reads_as_none() {
        let json = r#"{"severity": "error", "message": "clone failed"}"#;
        let parsed: ResultWithDiagnostic<Vec<String>> = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.result, None);
        assert!(parsed.is_failure());
    }

    proptest! {
        #[test]
        fn effective_severity_is_max_of_self_and_children(tree in tree_strategy()) {
            let expected = tree
                .children
                .iter()
                .map(Diagnostic::effective_severity)
                .fold(tree.severity, Severity::max);
            prop_assert_eq!(tree.effective_severity(), expected);
        }

        #[test]
        fn adding_error_child_raises_root(mut tree in tree_strategy()) {
            let before = tree.effective_severity();
            tree.add_child(Diagnostic::error("injected"));
            let after = tree.effective_severity();
            prop_assert!(after >= Severity::Error);
            prop_assert!(after >= before);
        }
    }
}
