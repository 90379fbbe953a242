//! Orchestrator loop
//!
//! One `Worker` per trigger source drives the cycle
//! Idle → Triggered → Remediating → Publishing → Idle, forever. All workers
//! share one `RemediationPipeline`, whose gate allows a single remediation
//! and publish transaction at a time across the whole process.

use crate::battery::ConditionBattery;
use crate::publisher::EvidencePublisher;
use crate::remediation::{RemediationRun, Remediator};
use crate::shutdown::ShutdownListener;
use crate::trigger::TriggerSource;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};
use warden_common::{
    PublishError, RemediationError, ReportArtifact, TriggerError, TriggerEvent, VerificationVerdict,
};

/// Where a worker is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Triggered,
    Remediating,
    Publishing,
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Triggered => "triggered",
            Self::Remediating => "remediating",
            Self::Publishing => "publishing",
        };
        f.write_str(s)
    }
}

/// How one trigger was handled
#[derive(Debug)]
pub enum CycleOutcome {
    /// Every condition passed; nothing ran
    Compliant(VerificationVerdict),
    /// The engine failed; nothing was published
    RemediationFailed(RemediationError),
    /// Remediated, but no evidence repository is configured
    Unpublished(ReportArtifact),
    Published {
        artifact: ReportArtifact,
        placed: PathBuf,
    },
    PublishFailed {
        artifact: ReportArtifact,
        error: PublishError,
    },
}

impl CycleOutcome {
    pub fn remediated(&self) -> bool {
        matches!(
            self,
            Self::Unpublished(_) | Self::Published { .. } | Self::PublishFailed { .. }
        )
    }

    pub fn artifact(&self) -> Option<&ReportArtifact> {
        match self {
            Self::Unpublished(artifact)
            | Self::Published { artifact, .. }
            | Self::PublishFailed { artifact, .. } => Some(artifact),
            Self::Compliant(_) | Self::RemediationFailed(_) => None,
        }
    }
}

/// Sent to an observer after every completed cycle
#[derive(Debug)]
pub struct CycleReport {
    pub source: String,
    pub outcome: CycleOutcome,
}

pub type CycleObserver = mpsc::UnboundedSender<CycleReport>;

// ============================================================================
// Remediation Pipeline
// ============================================================================

/// Remediate-then-publish, serialized process-wide
pub struct RemediationPipeline {
    baseline: PathBuf,
    profile: String,
    remediator: Arc<dyn Remediator>,
    publisher: Option<EvidencePublisher>,
    gate: Mutex<()>,
}

impl RemediationPipeline {
    pub fn new(baseline: impl Into<PathBuf>, profile: &str, remediator: Arc<dyn Remediator>) -> Self {
        Self {
            baseline: baseline.into(),
            profile: profile.to_string(),
            remediator,
            publisher: None,
            gate: Mutex::new(()),
        }
    }

    pub fn with_publisher(mut self, publisher: EvidencePublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn baseline(&self) -> &Path {
        &self.baseline
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    /// Handle one trigger from `source` to completion.
    ///
    /// Poll sources pass their battery and only remediate on a failing
    /// verdict; path watches pass `None` and always remediate.
    pub async fn run_cycle(
        &self,
        source: &str,
        event: &TriggerEvent,
        battery: Option<&ConditionBattery>,
    ) -> CycleOutcome {
        debug!(source, state = %CycleState::Triggered, "Trigger: {}", event);

        if let Some(battery) = battery {
            let verdict = battery.evaluate().await;
            if !verdict.needs_remediation() {
                debug!(source, "Compliant: {}", verdict.summary());
                return CycleOutcome::Compliant(verdict);
            }
            warn!(source, "Drift detected: {}", verdict.summary());
        } else {
            info!(source, "Change detected: {}", event);
        }

        let _gate = self.gate.lock().await;

        let run = RemediationRun::start(&self.baseline, &self.profile);
        info!(
            source,
            run_id = %run.id,
            state = %CycleState::Remediating,
            "Remediating {} with profile {}",
            run.baseline.display(),
            run.profile
        );

        let artifact = match self.remediator.remediate(&run).await {
            Ok(artifact) => artifact,
            Err(e) => {
                error!(source, run_id = %run.id, step = "remediate", "Remediation failed: {}", e);
                return CycleOutcome::RemediationFailed(e);
            }
        };
        info!(source, run_id = %run.id, "Report written to {}", artifact.path().display());

        let Some(publisher) = &self.publisher else {
            info!(source, run_id = %run.id, "No evidence repository configured, report kept locally");
            return CycleOutcome::Unpublished(artifact);
        };

        info!(
            source,
            run_id = %run.id,
            state = %CycleState::Publishing,
            "Publishing {} to {}",
            artifact.file_name(),
            publisher.target().repo.display()
        );
        match publisher.publish(&artifact, source).await {
            Ok(placed) => CycleOutcome::Published { artifact, placed },
            Err(e) => {
                error!(source, run_id = %run.id, step = %e.step, "{}", e);
                CycleOutcome::PublishFailed { artifact, error: e }
            }
        }
    }
}

// ============================================================================
// Worker
// ============================================================================

/// Why a worker stopped
#[derive(Debug)]
pub enum WorkerExit {
    Shutdown { cycles: u64 },
    SourceFailed { error: TriggerError, cycles: u64 },
}

pub struct Worker {
    label: String,
    source: Box<dyn TriggerSource>,
    battery: Option<Arc<ConditionBattery>>,
    pipeline: Arc<RemediationPipeline>,
    observer: Option<CycleObserver>,
}

impl Worker {
    pub fn new(
        source: Box<dyn TriggerSource>,
        battery: Option<Arc<ConditionBattery>>,
        pipeline: Arc<RemediationPipeline>,
    ) -> Self {
        Self {
            label: source.label().to_string(),
            source,
            battery,
            pipeline,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Option<CycleObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Process triggers until shutdown or until the source fails.
    ///
    /// The source is re-armed after every cycle, so events queued while the
    /// cycle ran (the engine's own fixes among them) never start another one.
    ///
    /// Shutdown is observed both while waiting for a trigger and in the
    /// middle of a cycle; an interrupted cycle is dropped, which kills any
    /// running engine process and releases the gate.
    pub async fn run(mut self, mut shutdown: ShutdownListener) -> WorkerExit {
        let mut cycles = 0u64;
        debug!(source = %self.label, state = %CycleState::Idle, "Worker started");

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.wait() => return WorkerExit::Shutdown { cycles },
                next = self.source.next_event() => next,
            };

            let event = match next {
                Ok(event) => event,
                Err(error) => {
                    warn!(source = %self.label, "Trigger source stopped: {}", error);
                    return WorkerExit::SourceFailed { error, cycles };
                }
            };

            let outcome = tokio::select! {
                biased;
                _ = shutdown.wait() => {
                    info!(source = %self.label, "Shutdown during cycle, abandoning it");
                    return WorkerExit::Shutdown { cycles };
                }
                outcome = self.pipeline.run_cycle(&self.label, &event, self.battery.as_deref()) => outcome,
            };

            cycles += 1;
            if let Some(observer) = &self.observer {
                let _ = observer.send(CycleReport {
                    source: self.label.clone(),
                    outcome,
                });
            }

            tokio::select! {
                biased;
                _ = shutdown.wait() => return WorkerExit::Shutdown { cycles },
                _ = self.source.rearm() => {}
            }
            debug!(source = %self.label, state = %CycleState::Idle, "Cycle {} done", cycles);
        }
    }
}
