//! Watcher supervisor
//!
//! Owns every worker for the lifetime of the process:
//! - opens all trigger sources up front and refuses to start if any fails
//! - runs each worker in its own task, so a panic stays contained
//! - re-opens a source that stopped (or whose worker panicked) after an
//!   exponential backoff
//! - on shutdown, waits a grace period for workers and aborts stragglers

pub mod backoff;

pub use backoff::{BackoffConfig, BackoffState};

use crate::orchestrator::{CycleObserver, RemediationPipeline, Worker, WorkerExit};
use crate::shutdown::{Shutdown, ShutdownListener};
use crate::trigger::{SourceSpec, TriggerSource};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use warden_common::StartupError;

pub struct WatcherSupervisor {
    specs: Vec<SourceSpec>,
    pipeline: Arc<RemediationPipeline>,
    backoff: BackoffConfig,
    grace: Duration,
    observer: Option<CycleObserver>,
}

impl WatcherSupervisor {
    pub fn new(pipeline: Arc<RemediationPipeline>) -> Self {
        Self {
            specs: Vec::new(),
            pipeline,
            backoff: BackoffConfig::default(),
            grace: Duration::from_secs(10),
            observer: None,
        }
    }

    pub fn add_source(&mut self, spec: SourceSpec) {
        self.specs.push(spec);
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Receive a report after every completed cycle of every worker
    pub fn with_observer(mut self, observer: CycleObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Open every source, then spawn one worker per source.
    ///
    /// Nothing is spawned unless all sources opened.
    pub fn start(self, shutdown: &Shutdown) -> Result<RunningSupervisor, StartupError> {
        if self.specs.is_empty() {
            return Err(StartupError::Config("no trigger sources configured".to_string()));
        }

        let mut seen = HashSet::new();
        for spec in &self.specs {
            if !seen.insert(spec.label.as_str()) {
                return Err(StartupError::Config(format!(
                    "duplicate trigger source label '{}'",
                    spec.label
                )));
            }
        }

        let mut opened = Vec::with_capacity(self.specs.len());
        for spec in &self.specs {
            let source = spec.open()?;
            info!(source = %spec.label, "Source ready: {}", spec.describe());
            opened.push(source);
        }

        let mut workers = Vec::with_capacity(opened.len());
        for (spec, source) in self.specs.into_iter().zip(opened) {
            let label = spec.label.clone();
            let handle = tokio::spawn(supervise(
                spec,
                source,
                Arc::clone(&self.pipeline),
                self.backoff.clone(),
                shutdown.listener(),
                self.observer.clone(),
            ));
            workers.push((label, handle));
        }

        info!("Supervising {} workers", workers.len());
        Ok(RunningSupervisor {
            workers,
            grace: self.grace,
        })
    }
}

/// Handle to the spawned workers
pub struct RunningSupervisor {
    workers: Vec<(String, JoinHandle<()>)>,
    grace: Duration,
}

impl RunningSupervisor {
    pub fn labels(&self) -> Vec<&str> {
        self.workers.iter().map(|(l, _)| l.as_str()).collect()
    }

    /// Wait for shutdown, then for every worker to stop.
    pub async fn wait(self, mut shutdown: ShutdownListener) {
        shutdown.wait().await;
        self.stop().await;
    }

    /// Give workers `grace` to finish after shutdown was triggered, then abort
    /// the rest.
    pub async fn stop(self) {
        info!("Stopping {} workers", self.workers.len());
        let deadline = Instant::now() + self.grace;
        for (label, mut handle) in self.workers {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => debug!(source = %label, "Worker stopped"),
                Ok(Err(e)) => error!(source = %label, "Worker task failed: {}", e),
                Err(_) => {
                    warn!(source = %label, "Worker did not stop in time, aborting");
                    handle.abort();
                }
            }
        }
    }
}

/// Keep one source's worker alive until shutdown.
async fn supervise(
    spec: SourceSpec,
    first: Box<dyn TriggerSource>,
    pipeline: Arc<RemediationPipeline>,
    backoff: BackoffConfig,
    mut shutdown: ShutdownListener,
    observer: Option<CycleObserver>,
) {
    let mut backoff = BackoffState::new(backoff);
    let mut ready = Some(first);

    loop {
        let source = match ready.take() {
            Some(source) => source,
            None => match spec.open() {
                Ok(source) => {
                    info!(source = %spec.label, "Source re-opened");
                    source
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!(source = %spec.label, "Cannot re-open source: {}; retrying in {:?}", e, delay);
                    if !sleep_unless_shutdown(delay, &mut shutdown).await {
                        return;
                    }
                    continue;
                }
            },
        };

        let worker =
            Worker::new(source, spec.battery(), Arc::clone(&pipeline)).with_observer(observer.clone());
        let run = tokio::spawn(worker.run(shutdown.clone()));

        let cycles = match run.await {
            Ok(WorkerExit::Shutdown { cycles }) => {
                debug!(source = %spec.label, "Worker exiting after {} cycles", cycles);
                return;
            }
            Ok(WorkerExit::SourceFailed { cycles, .. }) => cycles,
            Err(e) => {
                error!(source = %spec.label, "Worker crashed: {}", e);
                0
            }
        };

        if shutdown.is_shutdown() {
            return;
        }
        if cycles > 0 {
            backoff.reset();
        }
        let delay = backoff.next_delay();
        warn!(source = %spec.label, "Restarting worker in {:?}", delay);
        if !sleep_unless_shutdown(delay, &mut shutdown).await {
            return;
        }
    }
}

/// Returns false if shutdown arrived first.
async fn sleep_unless_shutdown(delay: Duration, shutdown: &mut ShutdownListener) -> bool {
    tokio::select! {
        biased;
        _ = shutdown.wait() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remediation::FakeRemediator;
    use warden_common::{EventMask, ReportNamer};

    fn pipeline(dir: &std::path::Path) -> Arc<RemediationPipeline> {
        let remediator = Arc::new(FakeRemediator::new(Arc::new(ReportNamer::new(dir))));
        Arc::new(RemediationPipeline::new("/b.xml", "standard", remediator))
    }

    #[tokio::test]
    async fn test_missing_watch_root_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut supervisor = WatcherSupervisor::new(pipeline(dir.path()));
        supervisor.add_source(SourceSpec::path_watch(
            "ok-watch",
            dir.path(),
            EventMask::parse("attrib").unwrap(),
        ));
        supervisor.add_source(SourceSpec::path_watch(
            "missing-watch",
            "/nonexistent/warden",
            EventMask::parse("attrib").unwrap(),
        ));

        let shutdown = Shutdown::new();
        match supervisor.start(&shutdown) {
            Err(StartupError::WatchPath { path, .. }) => {
                assert_eq!(path, std::path::PathBuf::from("/nonexistent/warden"))
            }
            Err(other) => panic!("unexpected error {:?}", other),
            Ok(_) => panic!("supervisor started with a missing root"),
        }
    }

    #[tokio::test]
    async fn test_duplicate_labels_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut supervisor = WatcherSupervisor::new(pipeline(dir.path()));
        let mask = EventMask::parse("attrib").unwrap();
        supervisor.add_source(SourceSpec::path_watch("w", dir.path(), mask.clone()));
        supervisor.add_source(SourceSpec::path_watch("w", dir.path(), mask));

        assert!(matches!(
            supervisor.start(&Shutdown::new()),
            Err(StartupError::Config(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_source_is_reopened_after_backoff() {
        use crate::trigger::FakeTriggerSource;
        use std::os::unix::fs::PermissionsExt;
        use tokio::sync::mpsc;

        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("late");
        let spec = SourceSpec::path_watch("late-watch", &root, EventMask::parse("attrib").unwrap());

        // First incarnation dies at once; re-opening fails until the root exists
        let (first, handle) = FakeTriggerSource::new("late-watch");
        drop(handle);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let shutdown = Shutdown::new();
        let backoff = BackoffConfig {
            initial: Duration::from_millis(10),
            max: Duration::from_millis(50),
            multiplier: 2.0,
        };
        let task = tokio::spawn(supervise(
            spec,
            Box::new(first),
            pipeline(dir.path()),
            backoff,
            shutdown.listener(),
            Some(tx),
        ));

        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::create_dir(&root).unwrap();
        let file = root.join("sudoers");
        std::fs::write(&file, "root ALL=(ALL) ALL\n").unwrap();

        let mut report = None;
        for round in 0..50u32 {
            let mode = if round % 2 == 0 { 0o600 } else { 0o640 };
            std::fs::set_permissions(&file, std::fs::Permissions::from_mode(mode)).unwrap();
            if let Ok(Some(r)) = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await {
                report = Some(r);
                break;
            }
        }
        let report = report.expect("re-opened source never triggered");
        assert_eq!(report.source, "late-watch");
        assert!(report.outcome.remediated());

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_no_sources_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = WatcherSupervisor::new(pipeline(dir.path()));
        assert!(supervisor.start(&Shutdown::new()).is_err());
    }
}
