//! Supervisor tests
//!
//! Start the supervisor from configuration the way the daemon does, with a
//! fake inventory and remediator in place of the real system.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use warden_common::{ReportNamer, StartupError};
use wardend::config::WardenConfig;
use wardend::inventory::{FakeInventory, ProbeKind};
use wardend::orchestrator::{CycleOutcome, RemediationPipeline};
use wardend::remediation::FakeRemediator;
use wardend::shutdown::Shutdown;
use wardend::supervisor::WatcherSupervisor;

fn poll_only_config(label: &str) -> WardenConfig {
    WardenConfig::from_toml_str(&format!(
        r#"
watch = []

[poll]
label = "{}"
interval_secs = 1

[[poll.conditions]]
probe = "process"
target = "auditd"
expect = "present"
"#,
        label
    ))
    .unwrap()
}

#[tokio::test]
async fn test_poll_drift_remediates_and_shuts_down() {
    let reports = tempfile::tempdir().unwrap();
    let config = poll_only_config("service-poll");
    let inventory = Arc::new(FakeInventory::new().with(ProbeKind::Process, "auditd", false));
    let battery = Arc::new(config.battery(inventory.clone()));

    let remediator = Arc::new(FakeRemediator::new(Arc::new(ReportNamer::new(reports.path()))));
    let pipeline = RemediationPipeline::new("/b.xml", &config.profile, remediator.clone());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut supervisor = WatcherSupervisor::new(Arc::new(pipeline))
        .with_backoff(config.supervisor.backoff())
        .with_grace(Duration::from_secs(1))
        .with_observer(tx);
    for spec in config.source_specs(battery).unwrap() {
        supervisor.add_source(spec);
    }

    let shutdown = Shutdown::new();
    let running = supervisor.start(&shutdown).unwrap();
    assert_eq!(running.labels(), ["service-poll"]);

    let report = timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.source, "service-poll");
    match report.outcome {
        CycleOutcome::Unpublished(artifact) => assert!(artifact.path().exists()),
        other => panic!("expected unpublished report, got {:?}", other),
    }
    assert_eq!(remediator.call_count(), 1);

    // Once compliant, ticks stop remediating
    inventory.set(ProbeKind::Process, "auditd", true);
    let report = timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(report.outcome, CycleOutcome::Compliant(_)));
    assert_eq!(remediator.call_count(), 1);

    shutdown.trigger();
    timeout(Duration::from_secs(3), running.wait(shutdown.listener()))
        .await
        .expect("supervisor did not stop");
}

#[tokio::test]
async fn test_missing_watch_root_from_config_is_startup_error() {
    let reports = tempfile::tempdir().unwrap();
    let config = WardenConfig::from_toml_str(
        r#"
[[watch]]
label = "opt-watch"
root = "/nonexistent/warden/opt"
events = ["attrib", "modify"]
"#,
    )
    .unwrap();

    let battery = Arc::new(config.battery(Arc::new(FakeInventory::new())));
    let remediator = Arc::new(FakeRemediator::new(Arc::new(ReportNamer::new(reports.path()))));
    let mut supervisor = WatcherSupervisor::new(Arc::new(RemediationPipeline::new(
        "/b.xml",
        "standard",
        remediator.clone(),
    )));
    for spec in config.source_specs(battery).unwrap() {
        supervisor.add_source(spec);
    }

    match supervisor.start(&Shutdown::new()) {
        Err(StartupError::WatchPath { path, .. }) => {
            assert_eq!(path, std::path::PathBuf::from("/nonexistent/warden/opt"))
        }
        Err(other) => panic!("unexpected error {:?}", other),
        Ok(_) => panic!("started with a missing watch root"),
    }
    assert_eq!(remediator.call_count(), 0);
}
