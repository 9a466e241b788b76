//! Environment variable overrides.
//!
//! Every Hammer variable carries the `HAMMER_` prefix. Invalid values never
//! override anything; they are collected so all problems can be reported at
//! once.

use super::source::Sourced;
use crate::errors::ErrorCode;
use std::env;
use std::str::FromStr;
use thiserror::Error;

pub const ENV_PREFIX: &str = "HAMMER_";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvError {
    #[error("Invalid value for {var}: expected {expected}, got '{value}'")]
    InvalidValue {
        var: String,
        expected: String,
        value: String,
    },

    #[error("Value out of range for {var}: {value} (valid: {min}..={max})")]
    OutOfRange {
        var: String,
        value: String,
        min: String,
        max: String,
    },

    #[error("Invalid log level for {var}: {value}")]
    InvalidLogLevel { var: String, value: String },
}

impl EnvError {
    /// Name of the offending variable.
    pub fn var(&self) -> &str {
        match self {
            Self::InvalidValue { var, .. }
            | Self::OutOfRange { var, .. }
            | Self::InvalidLogLevel { var, .. } => var,
        }
    }

    pub fn code(&self) -> ErrorCode {
        ErrorCode::ConfigEnvError
    }
}

/// Type-safe environment variable parser.
pub struct EnvParser {
    prefix: &'static str,
    errors: Vec<EnvError>,
}

impl EnvParser {
    pub fn new() -> Self {
        Self {
            prefix: ENV_PREFIX,
            errors: Vec::new(),
        }
    }

    pub fn errors(&self) -> &[EnvError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    /// Full variable name with prefix.
    pub fn var_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// Non-empty value of a variable, if set.
    fn lookup(&self, name: &str) -> Option<(String, String)> {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) if !value.trim().is_empty() => Some((var_name, value)),
            _ => None,
        }
    }

    pub fn get_string(&mut self, name: &str, default: &str) -> Sourced<String> {
        match self.lookup(name) {
            Some((var_name, value)) => Sourced::from_env(value.trim().to_string(), var_name),
            None => Sourced::default_value(default.to_string()),
        }
    }

    pub fn get_optional_string(&mut self, name: &str) -> Sourced<Option<String>> {
        match self.lookup(name) {
            Some((var_name, value)) => Sourced::from_env(Some(value.trim().to_string()), var_name),
            None => Sourced::default_value(None),
        }
    }

    /// Get a u64 value with range validation.
    pub fn get_u64_range(&mut self, name: &str, default: u64, min: u64, max: u64) -> Sourced<u64> {
        let Some((var_name, value)) = self.lookup(name) else {
            return Sourced::default_value(default);
        };
        match value.trim().parse::<u64>() {
            Ok(n) if (min..=max).contains(&n) => Sourced::from_env(n, var_name),
            Ok(n) => {
                self.errors.push(EnvError::OutOfRange {
                    var: var_name,
                    value: n.to_string(),
                    min: min.to_string(),
                    max: max.to_string(),
                });
                Sourced::default_value(default)
            }
            Err(_) => {
                self.errors.push(EnvError::InvalidValue {
                    var: var_name,
                    expected: "unsigned integer (seconds)".to_string(),
                    value,
                });
                Sourced::default_value(default)
            }
        }
    }

    pub fn get_log_level(&mut self, name: &str, default: &str) -> Sourced<String> {
        let Some((var_name, value)) = self.lookup(name) else {
            return Sourced::default_value(default.to_string());
        };
        let lower = value.trim().to_lowercase();
        if is_log_level(&lower) {
            Sourced::from_env(lower, var_name)
        } else {
            self.errors
                .push(EnvError::InvalidLogLevel { var: var_name, value });
            Sourced::default_value(default.to_string())
        }
    }

    /// Parse any `FromStr` value; `expected` describes valid input in errors.
    pub fn get_parsed<T: FromStr>(&mut self, name: &str, default: T, expected: &str) -> Sourced<T> {
        let Some((var_name, value)) = self.lookup(name) else {
            return Sourced::default_value(default);
        };
        match value.parse::<T>() {
            Ok(parsed) => Sourced::from_env(parsed, var_name),
            Err(_) => {
                self.errors.push(EnvError::InvalidValue {
                    var: var_name,
                    expected: expected.to_string(),
                    value,
                });
                Sourced::default_value(default)
            }
        }
    }
}

impl Default for EnvParser {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn is_log_level(level: &str) -> bool {
    matches!(level, "trace" | "debug" | "info" | "warn" | "error" | "off")
}
