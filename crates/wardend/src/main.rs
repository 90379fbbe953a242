//! Warden Daemon - continuous compliance monitor
//!
//! Watches for configuration drift, remediates against a security baseline,
//! and publishes the resulting reports to an evidence repository.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use warden_common::{ReportNamer, StartupError};
use wardend::battery::ConditionBattery;
use wardend::cli::{self, Cli, Invocation};
use wardend::config::WardenConfig;
use wardend::inventory::SystemInventory;
use wardend::logging;
use wardend::orchestrator::RemediationPipeline;
use wardend::publisher::{is_git_repo, EvidencePublisher, GitCli, PublishTarget};
use wardend::remediation::EngineRemediator;
use wardend::shutdown::{forward_os_signals, Shutdown};
use wardend::supervisor::WatcherSupervisor;

#[tokio::main]
async fn main() {
    let cli = match cli::parse(std::env::args_os()) {
        Invocation::Run(cli) => cli,
        Invocation::Exit(code) => std::process::exit(code),
    };

    logging::init(cli.verbose);

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{:#}", e);
            eprintln!("wardend: {:#}", e);
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    info!("Warden Daemon v{} starting", env!("CARGO_PKG_VERSION"));

    let mut config = WardenConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(profile) = &cli.profile {
        config.profile = profile.clone();
        config.validate()?;
    }

    let inventory = Arc::new(SystemInventory::new());
    let battery = Arc::new(config.battery(inventory));

    if cli.check {
        return check_once(&battery, cli.json).await;
    }

    if !cli.baseline.is_file() {
        return Err(StartupError::MissingBaseline(cli.baseline.clone()).into());
    }

    let namer = Arc::new(ReportNamer::new(&config.report_dir));
    std::fs::create_dir_all(namer.dir())
        .with_context(|| format!("creating report directory {}", namer.dir().display()))?;

    let remediator = EngineRemediator::new(
        &config.remediation.command,
        config.remediation.args.clone(),
        namer,
    )
    .with_timeout(Duration::from_secs(config.remediation.timeout_secs))
    .with_accepted_exit_codes(config.remediation.accepted_exit_codes.clone());

    let mut pipeline = RemediationPipeline::new(&cli.baseline, &config.profile, Arc::new(remediator));
    match cli.publish_target() {
        Some((repo, branch)) => {
            check_repository(repo).await?;
            let target = PublishTarget::new(repo, branch)
                .with_remote(&config.publish.remote)
                .with_subdir(&config.publish.subdir);
            info!(
                "Evidence goes to {} ({}/{})",
                repo.display(),
                target.remote,
                target.branch
            );
            pipeline = pipeline.with_publisher(EvidencePublisher::new(Arc::new(GitCli::new()), target));
        }
        None => info!(
            "No evidence repository given, reports stay in {}",
            config.report_dir.display()
        ),
    }

    let mut supervisor = WatcherSupervisor::new(Arc::new(pipeline))
        .with_backoff(config.supervisor.backoff())
        .with_grace(config.supervisor.grace());
    for spec in config.source_specs(Arc::clone(&battery))? {
        supervisor.add_source(spec);
    }

    let shutdown = Shutdown::new();
    let running = supervisor.start(&shutdown)?;
    info!(
        "Monitoring with profile {}: {}",
        config.profile,
        running.labels().join(", ")
    );

    tokio::spawn(forward_os_signals(shutdown.clone()));
    running.wait(shutdown.listener()).await;

    info!("Shut down cleanly");
    Ok(0)
}

async fn check_repository(repo: &Path) -> Result<(), StartupError> {
    if !is_git_repo(repo).await {
        return Err(StartupError::NotARepository(repo.to_path_buf()));
    }
    Ok(())
}

/// `--check`: one battery evaluation, exit 0 when compliant.
async fn check_once(battery: &ConditionBattery, json: bool) -> Result<i32> {
    let verdict = battery.evaluate().await;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&verdict).context("serializing verdict")?
        );
    } else {
        for outcome in &verdict.outcomes {
            match &outcome.reason {
                None => println!("  PASS  {}", outcome.name),
                Some(reason) => println!("  FAIL  {}: {}", outcome.name, reason),
            }
        }
        println!("{}", verdict.summary());
    }

    Ok(if verdict.needs_remediation() { 1 } else { 0 })
}
