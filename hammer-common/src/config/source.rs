//! Where a configuration value came from.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Origin of a configuration value, lowest precedence first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
    CommandLine,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::File => write!(f, "file"),
            Self::Environment => write!(f, "env"),
            Self::CommandLine => write!(f, "cli"),
        }
    }
}

/// A value together with its origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sourced<T> {
    pub value: T,
    pub source: ConfigSource,
    /// Variable name when the value came from the environment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_var: Option<String>,
    /// File the value was read from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl<T> Sourced<T> {
    pub fn default_value(value: T) -> Self {
        Self {
            value,
            source: ConfigSource::Default,
            env_var: None,
            path: None,
        }
    }

    pub fn from_file(value: T, path: impl Into<PathBuf>) -> Self {
        Self {
            value,
            source: ConfigSource::File,
            env_var: None,
            path: Some(path.into()),
        }
    }

    pub fn from_env(value: T, env_var: impl Into<String>) -> Self {
        Self {
            value,
            source: ConfigSource::Environment,
            env_var: Some(env_var.into()),
            path: None,
        }
    }

    pub fn from_cli(value: T) -> Self {
        Self {
            value,
            source: ConfigSource::CommandLine,
            env_var: None,
            path: None,
        }
    }

    /// Convert the value, keeping its origin.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Sourced<U> {
        Sourced {
            value: f(self.value),
            source: self.source,
            env_var: self.env_var,
            path: self.path,
        }
    }

    /// `other` if it came from a higher-precedence source, else `self`.
    pub fn overlay(self, other: Sourced<T>) -> Sourced<T> {
        if other.source > self.source { other } else { self }
    }

    /// Short description of the origin for `config show`.
    pub fn origin(&self) -> String {
        match (&self.env_var, &self.path) {
            (Some(var), _) => format!("env {var}"),
            (None, Some(path)) => format!("file {}", path.display()),
            (None, None) => self.source.to_string(),
        }
    }
}
