//! Remediation invoker
//!
//! Runs the external scan-and-fix engine once per call. The engine gets a
//! remediate flag, the profile, the output report path and the baseline
//! file, in that order, after any configured leading arguments:
//!
//! ```text
//! oscap xccdf eval --remediate --profile standard --results report-...xml baseline.xml
//! ```
//!
//! Success requires an accepted exit code *and* the report file on disk.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};
use warden_common::{RemediationError, ReportArtifact, ReportNamer};

/// Keep only this much of the engine's stderr in error messages
const MAX_STDERR_BYTES: usize = 2048;

/// One execution of the fix operation. Its report is named from
/// `started_at`.
#[derive(Debug, Clone)]
pub struct RemediationRun {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub baseline: PathBuf,
    pub profile: String,
}

impl RemediationRun {
    pub fn start(baseline: &Path, profile: &str) -> Self {
        Self {
            id: format!("run_{}", uuid::Uuid::new_v4()),
            started_at: Utc::now(),
            baseline: baseline.to_path_buf(),
            profile: profile.to_string(),
        }
    }
}

// ============================================================================
// Remediator Trait
// ============================================================================

#[async_trait]
pub trait Remediator: Send + Sync {
    /// Scan and fix against the run's baseline and profile, returning the
    /// report.
    async fn remediate(&self, run: &RemediationRun) -> Result<ReportArtifact, RemediationError>;
}

// ============================================================================
// Engine Remediator (Production)
// ============================================================================

pub struct EngineRemediator {
    program: String,
    leading_args: Vec<String>,
    namer: Arc<ReportNamer>,
    timeout: Duration,
    accepted_exit_codes: Vec<i32>,
}

impl EngineRemediator {
    pub fn new(program: &str, leading_args: Vec<String>, namer: Arc<ReportNamer>) -> Self {
        Self {
            program: program.to_string(),
            leading_args,
            namer,
            timeout: Duration::from_secs(1800),
            accepted_exit_codes: vec![0],
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_accepted_exit_codes(mut self, codes: Vec<i32>) -> Self {
        self.accepted_exit_codes = codes;
        self
    }

    fn command(&self, baseline: &Path, profile: &str, report: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args)
            .arg("--remediate")
            .arg("--profile")
            .arg(profile)
            .arg("--results")
            .arg(report)
            .arg(baseline)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Remediator for EngineRemediator {
    async fn remediate(&self, run: &RemediationRun) -> Result<ReportArtifact, RemediationError> {
        let (baseline, profile) = (run.baseline.as_path(), run.profile.as_str());
        let started_at = run.started_at;
        let report = self.namer.next_path(started_at);

        info!(
            "Running {} --remediate --profile {} on {}",
            self.program,
            profile,
            baseline.display()
        );

        let child = self
            .command(baseline, profile, &report)
            .spawn()
            .map_err(|source| RemediationError::Spawn {
                command: self.program.clone(),
                source,
            })?;

        // Dropping the child on timeout kills it
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| RemediationError::Spawn {
                command: self.program.clone(),
                source,
            })?,
            Err(_) => {
                discard_partial(&report).await;
                return Err(RemediationError::TimedOut(self.timeout.as_secs()));
            }
        };

        let code = match output.status.code() {
            Some(code) => code,
            None => {
                discard_partial(&report).await;
                return Err(RemediationError::Killed);
            }
        };

        if !self.accepted_exit_codes.contains(&code) {
            discard_partial(&report).await;
            return Err(RemediationError::Failed {
                status: format!("exit code {}", code),
                stderr: stderr_tail(&output.stderr),
            });
        }

        if tokio::fs::metadata(&report).await.is_err() {
            return Err(RemediationError::MissingArtifact(report));
        }

        debug!("Remediation engine exited with {}", code);
        Ok(ReportArtifact::new(report, started_at))
    }
}

async fn discard_partial(report: &Path) {
    if tokio::fs::remove_file(report).await.is_ok() {
        debug!("Discarded partial report {}", report.display());
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let trimmed = text.trim();
    if trimmed.len() <= MAX_STDERR_BYTES {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - MAX_STDERR_BYTES;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &trimmed[start..])
}

// ============================================================================
// Fake Remediator (Testing)
// ============================================================================

/// Scripted outcome for one fake remediation call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeOutcome {
    /// Write a report and succeed
    Succeed,
    /// Exit non-zero without a report
    Fail,
}

/// Remediator that writes a small report file without running anything.
///
/// Outcomes are consumed in order; once the script runs out every call
/// succeeds. Tracks how many calls overlap.
pub struct FakeRemediator {
    namer: Arc<ReportNamer>,
    script: Mutex<VecDeque<FakeOutcome>>,
    delay: Duration,
    calls: Mutex<Vec<(PathBuf, String)>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl FakeRemediator {
    pub fn new(namer: Arc<ReportNamer>) -> Self {
        Self {
            namer,
            script: Mutex::new(VecDeque::new()),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    pub fn with_outcomes(self, outcomes: impl IntoIterator<Item = FakeOutcome>) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.extend(outcomes);
        }
        self
    }

    /// Hold each call open for `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// (baseline, profile) of every call, in order
    pub fn calls(&self) -> Vec<(PathBuf, String)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls().len()
    }

    /// Highest number of calls that were in flight at once
    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Remediator for FakeRemediator {
    async fn remediate(&self, run: &RemediationRun) -> Result<ReportArtifact, RemediationError> {
        let (baseline, profile) = (run.baseline.as_path(), run.profile.as_str());
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((baseline.to_path_buf(), profile.to_string()));
        }

        let started_at = run.started_at;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let outcome = self
            .script
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .unwrap_or(FakeOutcome::Succeed);

        let result = match outcome {
            FakeOutcome::Succeed => {
                let report = self.namer.next_path(started_at);
                let body = format!("<report profile=\"{}\"/>\n", profile);
                match tokio::fs::write(&report, body).await {
                    Ok(()) => Ok(ReportArtifact::new(report, started_at)),
                    Err(source) => Err(RemediationError::Spawn {
                        command: "fake remediator".to_string(),
                        source,
                    }),
                }
            }
            FakeOutcome::Fail => Err(RemediationError::Failed {
                status: "exit code 1".to_string(),
                stderr: "simulated engine failure".to_string(),
            }),
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
