//! Error Catalog for Stack Hammer
//!
//! Every failure the job core can surface has a stable code (SH-E001 through
//! SH-E599), a message and remediation steps.
//!
//! # Error Code Ranges
//!
//! | Range      | Category    | Description                          |
//! |------------|-------------|--------------------------------------|
//! | E001-E099  | Config      | Configuration and setup errors       |
//! | E100-E199  | Service     | Transport failures talking to the service |
//! | E200-E299  | Job         | Job lifecycle (timeout, cancellation) |
//! | E300-E399  | Stack       | Remote diagnostics reporting errors  |
//! | E500-E599  | Internal    | Internal/unexpected errors           |

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error code enumeration covering every surfaced failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ErrorCode {
    // =========================================================================
    // Config Errors (E001-E099)
    // =========================================================================
    /// Configuration file could not be read
    ConfigReadError,
    /// Configuration file contains invalid TOML syntax
    ConfigParseError,
    /// Configuration contains invalid values
    ConfigValidationError,
    /// Environment variable has invalid value
    ConfigEnvError,
    /// Stack reference is not of the form owner/name
    ConfigInvalidStack,

    // =========================================================================
    // Service Errors (E100-E199)
    // =========================================================================
    /// Could not connect to the service
    ServiceConnectFailed,
    /// Service answered with an error status
    ServiceRequestFailed,
    /// Service response could not be decoded
    ServiceBadResponse,
    /// Local I/O failure during a service call
    ServiceIoError,

    // =========================================================================
    // Job Errors (E200-E299)
    // =========================================================================
    /// Job did not finish within the configured time budget
    JobTimeout,
    /// Job was cancelled on the service side
    JobCancelledRemotely,
    /// Polling was stopped by the caller
    JobAborted,

    // =========================================================================
    // Stack Errors (E300-E399)
    // =========================================================================
    /// Repository clone reported errors
    StackCloneFailed,
    /// Stack validation reported errors
    StackValidationFailed,
    /// Deployment result reported errors
    StackDeploymentFailed,

    // =========================================================================
    // Internal Errors (E500-E599)
    // =========================================================================
    /// Scenario file for the scripted service is unusable
    InternalScenarioError,
}

impl ErrorCode {
    /// Returns the numeric error code (without prefix).
    #[must_use]
    pub const fn code_number(&self) -> u16 {
        match self {
            Self::ConfigReadError => 1,
            Self::ConfigParseError => 2,
            Self::ConfigValidationError => 3,
            Self::ConfigEnvError => 4,
            Self::ConfigInvalidStack => 5,

            Self::ServiceConnectFailed => 100,
            Self::ServiceRequestFailed => 101,
            Self::ServiceBadResponse => 102,
            Self::ServiceIoError => 103,

            Self::JobTimeout => 200,
            Self::JobCancelledRemotely => 201,
            Self::JobAborted => 202,

            Self::StackCloneFailed => 300,
            Self::StackValidationFailed => 301,
            Self::StackDeploymentFailed => 302,

            Self::InternalScenarioError => 500,
        }
    }

    /// Returns the formatted error code string (e.g., "SH-E001").
    #[must_use]
    pub fn code_string(&self) -> String {
        format!("SH-E{:03}", self.code_number())
    }

    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self.code_number() {
            1..=99 => ErrorCategory::Config,
            100..=199 => ErrorCategory::Service,
            200..=299 => ErrorCategory::Job,
            300..=399 => ErrorCategory::Stack,
            _ => ErrorCategory::Internal,
        }
    }

    /// Returns the full error entry with all metadata.
    #[must_use]
    pub fn entry(&self) -> ErrorEntry {
        ErrorEntry {
            code: self.code_string(),
            category: self.category(),
            message: self.message().to_string(),
            remediation: self
                .remediation()
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }

    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::ConfigReadError => "Configuration file could not be read",
            Self::ConfigParseError => "Configuration file is not valid TOML",
            Self::ConfigValidationError => "Configuration contains invalid values",
            Self::ConfigEnvError => "Environment variable has an invalid value",
            Self::ConfigInvalidStack => "Stack must be given as <owner>/<name>",
            Self::ServiceConnectFailed => "Could not connect to the Stack Hammer service",
            Self::ServiceRequestFailed => "Stack Hammer service rejected the request",
            Self::ServiceBadResponse => "Stack Hammer service returned a malformed response",
            Self::ServiceIoError => "I/O failure while talking to the service",
            Self::JobTimeout => "Job didn't finish in time",
            Self::JobCancelledRemotely => "Job was cancelled",
            Self::JobAborted => "Polling was stopped before the job finished",
            Self::StackCloneFailed => "Cloning the stack repository reported errors",
            Self::StackValidationFailed => "Stack validation reported errors",
            Self::StackDeploymentFailed => "Stack deployment reported errors",
            Self::InternalScenarioError => "Scenario file could not be used",
        }
    }

    #[must_use]
    pub const fn remediation(&self) -> &'static [&'static str] {
        match self {
            Self::ConfigReadError => &[
                "Check file permissions on the configuration file",
                "Pass --config to point at another file",
            ],
            Self::ConfigParseError => &[
                "Run 'hammer config check' to locate the syntax error",
                "Ensure all strings are properly quoted",
            ],
            Self::ConfigValidationError => &[
                "Run 'hammer config check' for detailed diagnostics",
                "Service URL must use http or https",
            ],
            Self::ConfigEnvError => &[
                "Check HAMMER_* environment variables",
                "Unset the variable to fall back to the configuration file",
            ],
            Self::ConfigInvalidStack => &["Use the form <owner>/<name>, e.g. cloudsmith/webshop"],
            Self::ServiceConnectFailed => &[
                "Check the service URL in the configuration",
                "Verify network connectivity to the service",
            ],
            Self::ServiceRequestFailed => &[
                "Check that the API key is valid",
                "Inspect the service status page",
            ],
            Self::ServiceBadResponse => &["Check that client and service versions match"],
            Self::ServiceIoError => &["Retry the operation", "Check local disk and network"],
            Self::JobTimeout => &[
                "Increase polling.max_time_secs or set it to 0 for no limit",
                "The job keeps running remotely; cancel it on the service if needed",
            ],
            Self::JobCancelledRemotely => &["Check the service console for who cancelled the job"],
            Self::JobAborted => &["The job keeps running remotely; cancel it on the service if needed"],
            Self::StackCloneFailed => &[
                "Verify that the branch exists",
                "Check that the service can reach the repository",
            ],
            Self::StackValidationFailed => &["Fix the errors listed in the validation report"],
            Self::StackDeploymentFailed => &[
                "Inspect the per-host logs of the deployment",
                "Fix the failing resources and redeploy",
            ],
            Self::InternalScenarioError => &["Check the scenario JSON against the documented format"],
        }
    }

    #[must_use]
    pub const fn all() -> &'static [ErrorCode] {
        &[
            Self::ConfigReadError,
            Self::ConfigParseError,
            Self::ConfigValidationError,
            Self::ConfigEnvError,
            Self::ConfigInvalidStack,
            Self::ServiceConnectFailed,
            Self::ServiceRequestFailed,
            Self::ServiceBadResponse,
            Self::ServiceIoError,
            Self::JobTimeout,
            Self::JobCancelledRemotely,
            Self::JobAborted,
            Self::StackCloneFailed,
            Self::StackValidationFailed,
            Self::StackDeploymentFailed,
            Self::InternalScenarioError,
        ]
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code_string(), self.message())
    }
}

/// Error category for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Config,
    Service,
    Job,
    Stack,
    Internal,
}

impl ErrorCategory {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Config => "Configuration",
            Self::Service => "Service",
            Self::Job => "Job",
            Self::Stack => "Stack",
            Self::Internal => "Internal",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Complete error entry with all metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub code: String,
    pub category: ErrorCategory,
    pub message: String,
    pub remediation: Vec<String>,
}

impl ErrorEntry {
    /// Formats the error for display with full remediation steps.
    #[must_use]
    pub fn format_full(&self) -> String {
        let mut output = format!("[{}] {}\n", self.code, self.message);

        if !self.remediation.is_empty() {
            output.push_str("\nRemediation steps:\n");
            for (i, step) in self.remediation.iter().enumerate() {
                output.push_str(&format!("  {}. {}\n", i + 1, step));
            }
        }

        output
    }

    #[must_use]
    pub fn format_brief(&self) -> String {
        format!("[{}] {}", self.code, self.message)
    }
}

impl fmt::Display for ErrorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_brief())
    }
}
