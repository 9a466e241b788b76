//! Stack Hammer command line.
//!
//! Validates and deploys stacks, following deployment jobs until they
//! finish. Service answers are replayed from scenario files.

#![forbid(unsafe_code)]

mod commands;
mod render;

use clap::{Args, Parser, Subcommand};
use hammer_common::config::{ConfigError, EffectiveConfig};
use hammer_common::{DEFAULT_BRANCH, EventBus, JobError, ScenarioError};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "hammer")]
#[command(author, version, about = "Stack Hammer - validate and deploy stacks")]
struct Cli {
    /// Path to config file (default: <config dir>/hammer/config.toml)
    #[arg(short, long, global = true, env = "HAMMER_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Machine-readable output: JSON logs and JSON reports
    #[arg(long, global = true)]
    json: bool,

    /// Stream job events to stderr as JSON lines
    #[arg(long, global = true)]
    events: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
pub struct StackArgs {
    /// Scenario file with the service answers to replay
    #[arg(long)]
    pub scenario: PathBuf,

    /// Stack to operate on, as <owner>/<name>
    #[arg(short, long)]
    pub stack: String,

    /// Branch of the stack repository
    #[arg(short, long, default_value = DEFAULT_BRANCH)]
    pub branch: String,
}

#[derive(Args)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub stack: StackArgs,

    /// Write the decoded dependency graph (SVG) to this file
    #[arg(long)]
    pub graph_out: Option<PathBuf>,
}

#[derive(Args)]
pub struct DeployArgs {
    #[command(flatten)]
    pub stack: StackArgs,

    /// Plan the deployment without touching any machine
    #[arg(long)]
    pub dry_run: bool,

    /// Seconds between polls (values below 1 are raised to 1)
    #[arg(long, allow_negative_numbers = true)]
    pub poll_interval: Option<i64>,

    /// Give up after this many seconds (0 or less = no limit)
    #[arg(long, allow_negative_numbers = true)]
    pub max_time: Option<i64>,
}

#[derive(Subcommand)]
enum Command {
    /// Clone and validate a stack
    Validate(ValidateArgs),
    /// Clone and deploy a stack, following the job to completion
    Deploy(DeployArgs),
    /// Inspect configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Print every setting and where it came from
    Show,
    /// Validate the configuration
    Check,
}

/// Settings shared by all commands.
pub struct Context {
    pub config: EffectiveConfig,
    pub json: bool,
    pub events: Option<EventBus>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match EffectiveConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            report_error(&anyhow::Error::from(err), cli.json);
            return ExitCode::from(2);
        }
    };

    init_tracing(cli.verbose, cli.json, &config.log_level.value);

    let (events, printer) = if cli.events {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let printer = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(line) => eprintln!("{line}"),
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }
        });
        (Some(bus), Some(printer))
    } else {
        (None, None)
    };

    let ctx = Context {
        config,
        json: cli.json,
        events,
    };

    let result = match cli.command {
        Command::Validate(args) => commands::validate(&ctx, args).await,
        Command::Deploy(args) => commands::deploy(&ctx, args).await,
        Command::Config(ConfigCommand::Show) => commands::config_show(&ctx),
        Command::Config(ConfigCommand::Check) => commands::config_check(&ctx),
    };

    let json = ctx.json;
    drop(ctx);
    if let Some(printer) = printer {
        let _ = printer.await;
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report_error(&err, json);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool, json: bool, level: &str) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn report_error(err: &anyhow::Error, json: bool) {
    let code = if let Some(job) = err.downcast_ref::<JobError>() {
        Some(job.code())
    } else if let Some(scenario) = err.downcast_ref::<ScenarioError>() {
        Some(scenario.code())
    } else {
        err.downcast_ref::<ConfigError>().map(ConfigError::code)
    };

    if json {
        let payload = serde_json::json!({
            "error": code.map(|code| code.entry()),
            "message": format!("{err:#}"),
        });
        println!("{payload}");
        return;
    }

    match code {
        Some(code) => {
            eprintln!("{}", code.entry().format_brief());
            eprintln!("{err:#}");
        }
        None => eprintln!("Error: {err:#}"),
    }
}
