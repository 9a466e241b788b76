//! TOML configuration file and the layered effective configuration.
//!
//! Precedence, lowest first: built-in defaults, the config file,
//! `HAMMER_*` environment variables, command line flags.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use super::env::{EnvError, EnvParser};
use super::source::Sourced;
use crate::correlate::UnattachedPolicy;
use crate::errors::ErrorCode;
use crate::poller::PollerConfig;

pub const DEFAULT_SERVICE_URL: &str = "https://stackservice.cloudsmith.com/service/api";
pub const DEFAULT_POLL_INTERVAL_SECS: i64 = 15;
pub const DEFAULT_LOG_LEVEL: &str = "info";
const MAX_POLL_INTERVAL_SECS: u64 = 3600;
const MAX_TIME_LIMIT_SECS: u64 = 7 * 24 * 3600;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: Box<toml::de::Error>,
    },
}

impl ConfigError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Read { .. } => ErrorCode::ConfigReadError,
            Self::Parse { .. } => ErrorCode::ConfigParseError,
        }
    }
}

// ── File Layout ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSection {
    pub log_level: String,
}

impl Default for GeneralSection {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSection {
    pub url: String,
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            url: DEFAULT_SERVICE_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingSection {
    /// Seconds between polls; values below 1 are raised to 1.
    pub interval_secs: i64,
    /// Overall budget in seconds; 0 means no limit.
    pub max_time_secs: i64,
}

impl Default for PollingSection {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            max_time_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationSection {
    pub unattached: UnattachedPolicy,
}

/// Contents of `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HammerConfig {
    pub general: GeneralSection,
    pub service: ServiceSection,
    pub polling: PollingSection,
    pub correlation: CorrelationSection,
}

impl HammerConfig {
    /// `<config dir>/hammer/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("hammer").join("config.toml"))
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let content = read_config(path)?;
        Self::from_toml_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source: Box::new(source),
        })
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig::from_secs(
            self.polling.interval_secs,
            Some(self.polling.max_time_secs),
        )
    }
}

fn layer<T>(value: T, in_file: bool, path: &Path) -> Sourced<T> {
    if in_file {
        Sourced::from_file(value, path)
    } else {
        Sourced::default_value(value)
    }
}

fn read_config(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

// ── Effective Configuration ──────────────────────────────────────────────

/// Every setting with the layer it was taken from.
#[derive(Debug, Clone)]
pub struct EffectiveConfig {
    pub config_path: Option<PathBuf>,
    pub service_url: Sourced<String>,
    pub poll_interval_secs: Sourced<i64>,
    pub max_time_secs: Sourced<i64>,
    pub unattached: Sourced<UnattachedPolicy>,
    pub log_level: Sourced<String>,
    pub env_errors: Vec<EnvError>,
}

impl EffectiveConfig {
    /// Load defaults, then `explicit` (or the default path, when it exists),
    /// then the environment.
    ///
    /// An explicitly named file must exist; a missing default file is
    /// not an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => HammerConfig::default_path().filter(|path| path.exists()),
        };
        let mut effective = match &path {
            Some(path) => {
                let content = read_config(path)?;
                Self::from_file_content(&content, path)?
            }
            None => Self::defaults(),
        };
        effective.apply_env(&mut EnvParser::new());
        Ok(effective)
    }

    pub fn defaults() -> Self {
        let defaults = HammerConfig::default();
        Self {
            config_path: None,
            service_url: Sourced::default_value(defaults.service.url),
            poll_interval_secs: Sourced::default_value(defaults.polling.interval_secs),
            max_time_secs: Sourced::default_value(defaults.polling.max_time_secs),
            unattached: Sourced::default_value(defaults.correlation.unattached),
            log_level: Sourced::default_value(defaults.general.log_level),
            env_errors: Vec::new(),
        }
    }

    /// Layer a config file over the defaults. Only keys present in the file
    /// are attributed to it.
    pub fn from_file_content(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let parse_error = |source: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            source: Box::new(source),
        };
        let config: HammerConfig = toml::from_str(content).map_err(parse_error)?;
        let table: toml::Table = toml::from_str(content).map_err(parse_error)?;
        let present = |section: &str, key: &str| {
            table
                .get(section)
                .and_then(|value| value.get(key))
                .is_some()
        };

        debug!(path = %path.display(), "Loaded config file");
        Ok(Self {
            config_path: Some(path.to_path_buf()),
            service_url: layer(config.service.url, present("service", "url"), path),
            poll_interval_secs: layer(
                config.polling.interval_secs,
                present("polling", "interval_secs"),
                path,
            ),
            max_time_secs: layer(
                config.polling.max_time_secs,
                present("polling", "max_time_secs"),
                path,
            ),
            unattached: layer(
                config.correlation.unattached,
                present("correlation", "unattached"),
                path,
            ),
            log_level: layer(config.general.log_level, present("general", "log_level"), path),
            env_errors: Vec::new(),
        })
    }

    /// Apply `HAMMER_*` overrides, collecting invalid values.
    pub fn apply_env(&mut self, parser: &mut EnvParser) {
        let url = parser.get_string("SERVICE_URL", &self.service_url.value);
        self.service_url = self.service_url.clone().overlay(url);

        let interval = parser
            .get_u64_range("POLL_INTERVAL", 0, 0, MAX_POLL_INTERVAL_SECS)
            .map(|secs| secs as i64);
        self.poll_interval_secs = self.poll_interval_secs.clone().overlay(interval);

        let max_time = parser
            .get_u64_range("MAX_TIME", 0, 0, MAX_TIME_LIMIT_SECS)
            .map(|secs| secs as i64);
        self.max_time_secs = self.max_time_secs.clone().overlay(max_time);

        let unattached = parser.get_parsed(
            "UNATTACHED",
            self.unattached.value,
            "unknown_host or machine_name",
        );
        self.unattached = self.unattached.clone().overlay(unattached);

        let level = parser.get_log_level("LOG_LEVEL", &self.log_level.value);
        self.log_level = self.log_level.clone().overlay(level);

        self.env_errors.extend(parser.take_errors());
    }

    pub fn set_poll_interval(&mut self, secs: i64) {
        self.poll_interval_secs = Sourced::from_cli(secs);
    }

    pub fn set_max_time(&mut self, secs: i64) {
        self.max_time_secs = Sourced::from_cli(secs);
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig::from_secs(self.poll_interval_secs.value, Some(self.max_time_secs.value))
    }

    /// Plain values, as they would be written to a config file.
    pub fn to_config(&self) -> HammerConfig {
        HammerConfig {
            general: GeneralSection {
                log_level: self.log_level.value.clone(),
            },
            service: ServiceSection {
                url: self.service_url.value.clone(),
            },
            polling: PollingSection {
                interval_secs: self.poll_interval_secs.value,
                max_time_secs: self.max_time_secs.value,
            },
            correlation: CorrelationSection {
                unattached: self.unattached.value,
            },
        }
    }

    /// `(key, value, origin)` rows for display.
    pub fn rows(&self) -> Vec<(&'static str, String, String)> {
        vec![
            (
                "service.url",
                self.service_url.value.clone(),
                self.service_url.origin(),
            ),
            (
                "polling.interval_secs",
                self.poll_interval_secs.value.to_string(),
                self.poll_interval_secs.origin(),
            ),
            (
                "polling.max_time_secs",
                self.max_time_secs.value.to_string(),
                self.max_time_secs.origin(),
            ),
            (
                "correlation.unattached",
                self.unattached.value.to_string(),
                self.unattached.origin(),
            ),
            (
                "general.log_level",
                self.log_level.value.clone(),
                self.log_level.origin(),
            ),
        ]
    }
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use crate::config::ConfigSource;
    use crate::config::env_test_lock;
    use std::io::Write;
    use std::time::Duration;

    fn clear_hammer_env() {
        for var in [
            "HAMMER_SERVICE_URL",
            "HAMMER_POLL_INTERVAL",
            "HAMMER_MAX_TIME",
            "HAMMER_UNATTACHED",
            "HAMMER_LOG_LEVEL",
        ] {
            // SAFETY: env access is serialized by env_test_lock.
            unsafe { std::env::remove_var(var) };
        }
    }

    #[test]
    fn empty_file_yields_defaults() {
        let config = HammerConfig::from_toml_str("").unwrap();
        assert_eq!(config, HammerConfig::default());
        assert_eq!(config.service.url, DEFAULT_SERVICE_URL);
        let poller = config.poller_config();
        assert_eq!(poller.poll_interval(), Duration::from_secs(15));
        assert_eq!(poller.max_time(), None);
    }

    #[test]
    fn zero_interval_clamps_to_one_second() {
        let config = HammerConfig::from_toml_str("[polling]\ninterval_secs = 0\n").unwrap();
        assert_eq!(config.poller_config().poll_interval(), Duration::from_secs(1));

        let config = HammerConfig::from_toml_str("[polling]\ninterval_secs = -3\n").unwrap();
        assert_eq!(config.poller_config().poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn full_file_round_trips() {
        let toml = r#"
[general]
log_level = "debug"

[service]
url = "http://localhost:8080/api"

[polling]
interval_secs = 5
max_time_secs = 600

[correlation]
unattached = "machine_name"
"#;
        let config = HammerConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.polling.interval_secs, 5);
        assert_eq!(config.correlation.unattached, UnattachedPolicy::MachineName);
        let poller = config.poller_config();
        assert_eq!(poller.max_time(), Some(Duration::from_secs(600)));

        let written = config.to_toml().unwrap();
        assert_eq!(HammerConfig::from_toml_str(&written).unwrap(), config);
    }

    #[test]
    fn only_present_keys_are_attributed_to_the_file() {
        let _guard = env_test_lock();
        clear_hammer_env();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[polling]\ninterval_secs = 30").unwrap();

        let effective = EffectiveConfig::load(Some(file.path())).unwrap();
        assert_eq!(effective.poll_interval_secs.value, 30);
        assert_eq!(effective.poll_interval_secs.source, ConfigSource::File);
        assert_eq!(effective.max_time_secs.source, ConfigSource::Default);
        assert_eq!(effective.service_url.value, DEFAULT_SERVICE_URL);
        assert_eq!(effective.config_path.as_deref(), Some(file.path()));
    }

    #[test]
    fn environment_overrides_file() {
        let _guard = env_test_lock();
        clear_hammer_env();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[polling]\ninterval_secs = 30\nmax_time_secs = 120").unwrap();
        // SAFETY: env access is serialized by env_test_lock.
        unsafe {
            std::env::set_var("HAMMER_POLL_INTERVAL", "4");
            std::env::set_var("HAMMER_MAX_TIME", "forever");
        }

        let effective = EffectiveConfig::load(Some(file.path())).unwrap();
        assert_eq!(effective.poll_interval_secs.value, 4);
        assert_eq!(
            effective.poll_interval_secs.env_var.as_deref(),
            Some("HAMMER_POLL_INTERVAL")
        );
        // Invalid env value leaves the file value in place.
        assert_eq!(effective.max_time_secs.value, 120);
        assert_eq!(effective.max_time_secs.source, ConfigSource::File);
        assert_eq!(effective.env_errors.len(), 1);

        clear_hammer_env();
    }

    #[test]
    fn cli_overrides_everything() {
        let mut effective = EffectiveConfig::defaults();
        effective.set_poll_interval(2);
        effective.set_max_time(60);
        assert_eq!(effective.poll_interval_secs.source, ConfigSource::CommandLine);
        let poller = effective.poller_config();
        assert_eq!(poller.poll_interval(), Duration::from_secs(2));
        assert_eq!(poller.max_time(), Some(Duration::from_secs(60)));
        assert_eq!(effective.to_config().polling.interval_secs, 2);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = EffectiveConfig::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert_eq!(err.code(), ErrorCode::ConfigReadError);
    }

    #[test]
    fn malformed_file_reports_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[polling\ninterval_secs = ").unwrap();
        let err = HammerConfig::load_file(file.path()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConfigParseError);
        assert!(err.to_string().contains("failed to parse config"));
    }

    #[test]
    fn rows_show_origin() {
        let effective = EffectiveConfig::defaults();
        let rows = effective.rows();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[1], ("polling.interval_secs", "15".to_string(), "default".to_string()));
    }
}
