pub mod logging;

pub use logging::init_test_logging;

use std::path::Path;
use std::process::{Command, Output};

/// Run the `hammer` binary with a clean `HAMMER_*` environment.
pub fn run_hammer(args: &[&str], config: &Path) -> Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_hammer"));
    for var in [
        "HAMMER_CONFIG",
        "HAMMER_SERVICE_URL",
        "HAMMER_POLL_INTERVAL",
        "HAMMER_MAX_TIME",
        "HAMMER_UNATTACHED",
        "HAMMER_LOG_LEVEL",
        "RUST_LOG",
    ] {
        cmd.env_remove(var);
    }
    cmd.arg("--config").arg(config).args(args);
    cmd.output().expect("failed to run hammer")
}
