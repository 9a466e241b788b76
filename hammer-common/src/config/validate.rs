//! Sanity checks over the effective configuration.

use serde::Serialize;
use std::fmt;

use super::env::is_log_level;
use super::file::EffectiveConfig;
use crate::diagnostic::{Diagnostic, Severity};

/// Shortest budget that leaves time for a deployment to get scheduled.
pub const MIN_MAX_TIME_SECS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigWarning {
    pub key: String,
    pub severity: Severity,
    pub message: String,
}

impl ConfigWarning {
    fn new(key: &str, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            severity,
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.severity, self.key, self.message)
    }
}

/// Check every setting. Errors make the configuration unusable, warnings
/// describe values that will be adjusted or are likely mistakes.
pub fn validate_config(config: &EffectiveConfig) -> Vec<ConfigWarning> {
    let mut warnings = Vec::new();

    if let Err(message) = check_service_url(&config.service_url.value) {
        warnings.push(ConfigWarning::new("service.url", Severity::Error, message));
    }

    let interval = config.poll_interval_secs.value;
    if interval < 1 {
        warnings.push(ConfigWarning::new(
            "polling.interval_secs",
            Severity::Warning,
            format!("poll interval {interval} is not positive, using 1 second"),
        ));
    }

    let max_time = config.max_time_secs.value;
    if max_time > 0 && max_time < MIN_MAX_TIME_SECS {
        warnings.push(ConfigWarning::new(
            "polling.max_time_secs",
            Severity::Warning,
            format!("max time {max_time}s is below {MIN_MAX_TIME_SECS}s"),
        ));
    }

    if !is_log_level(&config.log_level.value) {
        warnings.push(ConfigWarning::new(
            "general.log_level",
            Severity::Warning,
            format!("unknown log level '{}', using info", config.log_level.value),
        ));
    }

    for err in &config.env_errors {
        warnings.push(ConfigWarning::new(
            err.var(),
            Severity::Error,
            format!("[{}] {err}", err.code().code_string()),
        ));
    }

    warnings
}

/// Fold the warnings into one diagnostic tree.
pub fn warnings_diagnostic(warnings: &[ConfigWarning]) -> Diagnostic {
    let mut root = Diagnostic::ok("configuration");
    for warning in warnings {
        root.add_child(Diagnostic::new(
            warning.severity,
            format!("{}: {}", warning.key, warning.message),
        ));
    }
    root
}

fn check_service_url(url: &str) -> Result<(), String> {
    let url = url.trim();
    let Some((scheme, rest)) = url.split_once("://") else {
        return Err(format!("'{url}' is not a valid URL"));
    };
    let scheme = scheme.to_ascii_lowercase();
    if scheme != "http" && scheme != "https" {
        return Err(format!("service URL must use http or https, not '{scheme}'"));
    }
    let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host_name = host.rsplit_once(':').map_or(host, |(name, _)| name);
    if host_name.is_empty() || host.contains(char::is_whitespace) {
        return Err(format!("'{url}' has no host"));
    }
    Ok(())
}
