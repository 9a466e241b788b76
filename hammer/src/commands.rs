//! Subcommand implementations.

use anyhow::{Context as _, Result, bail};
use hammer_common::config::{validate_config, warnings_diagnostic};
use hammer_common::util::humanize_duration;
use hammer_common::{
    DeployMode, Deployer, ErrorCode, Scenario, ScriptedStackService, Severity, Validator,
};
use serde_json::json;
use tracing::{info, warn};

use crate::render::{outcome_json, print_diagnostic, print_host_problems, print_hosts};
use crate::{Context, DeployArgs, ValidateArgs};

fn load_service(args: &crate::StackArgs) -> Result<ScriptedStackService> {
    let scenario = Scenario::from_file(&args.scenario)?;
    info!(scenario = %args.scenario.display(), "Replaying service answers");
    Ok(ScriptedStackService::from_scenario(scenario))
}

pub async fn validate(ctx: &Context, args: ValidateArgs) -> Result<()> {
    let service = load_service(&args.stack)?;
    info!(service = %ctx.config.service_url.value, "Using Stack Hammer service");

    let validator = Validator::new(&args.stack.stack, args.stack.branch.clone())?;
    let report = validator.run(&service).await?;

    if let Some(path) = &args.graph_out {
        let svg = report
            .decode_graph()
            .context("validation produced no dependency graph")?
            .context("dependency graph is not valid base64")?;
        std::fs::write(path, svg)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), "Wrote dependency graph");
    }

    if ctx.json {
        let value = json!({
            "stack": validator.stack().to_string(),
            "stack_base": report.stack_base(),
            "severity": report.severity(),
            "summary": report.summary(),
            "diagnostic": report.validation.diagnostic,
            "has_graph": report.graph_payload().is_some(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Validation of {} ({})", validator.stack(), report.stack_base());
    print_diagnostic("Result", &report.validation.diagnostic);
    println!("Summary: {}", report.summary());
    Ok(())
}

pub async fn deploy(ctx: &Context, args: DeployArgs) -> Result<()> {
    let service = load_service(&args.stack)?;
    info!(service = %ctx.config.service_url.value, "Using Stack Hammer service");

    let mut config = ctx.config.clone();
    if let Some(secs) = args.poll_interval {
        config.set_poll_interval(secs);
    }
    if let Some(secs) = args.max_time {
        config.set_max_time(secs);
    }

    let mut deployer = Deployer::new(
        &args.stack.stack,
        args.stack.branch.clone(),
        config.poller_config(),
        config.unattached.value,
    )?
    .with_mode(DeployMode {
        dry_run: args.dry_run,
    });
    if let Some(events) = &ctx.events {
        deployer = deployer.with_events(events.clone());
    }

    let cancel = deployer.cancel_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping the poll loop (the job keeps running)");
            cancel.cancel();
        }
    });

    let result = deployer.run(&service).await;
    interrupt.abort();
    let hosts = deployer.aggregator().list_host_entries();

    let report = match result {
        Ok(report) => report,
        Err(err) => {
            if !ctx.json {
                print_hosts(&hosts);
                print_host_problems(&hosts);
            }
            return Err(err.into());
        }
    };

    if ctx.json {
        let value = outcome_json(&report.outcome, &report.summary(), &hosts);
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    let mode = if args.dry_run { "Dry run" } else { "Deployment" };
    println!(
        "{mode} of {} finished: {} after {} polls ({})",
        deployer.stack(),
        report.outcome.final_state,
        report.outcome.polls,
        humanize_duration(report.outcome.elapsed),
    );
    if report.outcome.severity > Severity::Ok {
        print_diagnostic("Result", &report.outcome.result.diagnostic);
    }
    println!("Summary: {}", report.summary());
    println!();
    print_hosts(&hosts);
    print_host_problems(&hosts);
    Ok(())
}

pub fn config_show(ctx: &Context) -> Result<()> {
    let rows = ctx.config.rows();
    if ctx.json {
        let values: serde_json::Map<_, _> = rows
            .into_iter()
            .map(|(key, value, origin)| {
                (key.to_string(), json!({ "value": value, "source": origin }))
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&values)?);
        return Ok(());
    }

    match &ctx.config.config_path {
        Some(path) => println!("# config file: {}", path.display()),
        None => println!("# no config file, using defaults"),
    }
    let width = rows.iter().map(|(key, ..)| key.len()).max().unwrap_or(0);
    for (key, value, origin) in rows {
        println!("{key:<width$} = {value}  ({origin})");
    }
    Ok(())
}

pub fn config_check(ctx: &Context) -> Result<()> {
    let warnings = validate_config(&ctx.config);
    let diagnostic = warnings_diagnostic(&warnings);

    if ctx.json {
        println!("{}", serde_json::to_string_pretty(&warnings)?);
    } else if warnings.is_empty() {
        println!("Configuration OK");
    } else {
        for warning in &warnings {
            println!("{warning}");
        }
        println!("Summary: {}", diagnostic.summary());
    }

    if diagnostic.effective_severity().is_failure() {
        bail!("{}", ErrorCode::ConfigValidationError.entry().format_brief());
    }
    Ok(())
}
