//! Configuration for Hammer.
//!
//! - TOML config file with defaults for every key
//! - `HAMMER_*` environment overrides
//! - Source tracking for `config show`
//! - Validation on startup

pub mod env;
pub mod file;
pub mod source;
pub mod validate;

pub use env::{EnvError, EnvParser};
pub use file::{
    ConfigError, DEFAULT_POLL_INTERVAL_SECS, DEFAULT_SERVICE_URL, EffectiveConfig, HammerConfig,
};
pub use source::{ConfigSource, Sourced};
pub use validate::{ConfigWarning, validate_config, warnings_diagnostic};

#[cfg(test)]
pub(crate) fn env_test_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock, PoisonError};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}
