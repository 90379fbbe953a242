//! Error types for Warden.
//!
//! Every failure a worker can hit is contained in its own orchestrator loop;
//! only `StartupError` is fatal to the process.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Fatal configuration problems detected before monitoring begins.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Watched path {path} is not accessible: {reason}")]
    WatchPath { path: PathBuf, reason: String },

    #[error("Baseline file {0} does not exist")]
    MissingBaseline(PathBuf),

    #[error("Repository {0} is not a git working tree")]
    NotARepository(PathBuf),
}

/// A process, service or package query that could not be executed.
///
/// Callers treat this as a failed check, never as a pass.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InventoryError {
    #[error("Failed to run {command}: {reason}")]
    Spawn { command: String, reason: String },

    #[error("No supported package manager found")]
    NoPackageManager,

    #[error("Query for {target} returned unexpected output: {detail}")]
    Unexpected { target: String, detail: String },
}

/// The external scan-and-fix engine failed or produced no report.
#[derive(Error, Debug)]
pub enum RemediationError {
    #[error("Failed to start {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Remediation engine exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("Remediation engine was killed by a signal")]
    Killed,

    #[error("Remediation engine did not finish within {0} seconds")]
    TimedOut(u64),

    #[error("Remediation engine reported success but {0} was not written")]
    MissingArtifact(PathBuf),
}

/// The individual steps of a publish transaction, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PublishStep {
    Place,
    Stage,
    Commit,
    Push,
}

impl PublishStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Place => "place",
            Self::Stage => "stage",
            Self::Commit => "commit",
            Self::Push => "push",
        }
    }
}

impl fmt::Display for PublishStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A publish transaction stopped at `step`; later steps were not attempted.
#[derive(Error, Debug)]
#[error("Publishing {artifact} failed at {step} step: {message}")]
pub struct PublishError {
    pub step: PublishStep,
    pub artifact: String,
    pub message: String,
}

impl PublishError {
    pub fn new(step: PublishStep, artifact: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            step,
            artifact: artifact.into(),
            message: message.into(),
        }
    }
}

/// Failure reported by the version-control client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("git {operation} failed: {detail}")]
pub struct VcsError {
    pub operation: String,
    pub detail: String,
}

impl VcsError {
    pub fn new(operation: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            detail: detail.into(),
        }
    }
}

/// A trigger source could not be opened or stopped producing events.
#[derive(Error, Debug)]
pub enum TriggerError {
    #[error("Cannot watch {path}: {reason}")]
    Watch { path: PathBuf, reason: String },

    #[error("Notification facility for {0} closed")]
    Closed(String),
}

impl From<TriggerError> for StartupError {
    fn from(err: TriggerError) -> Self {
        match err {
            TriggerError::Watch { path, reason } => StartupError::WatchPath { path, reason },
            other => StartupError::Config(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_error_names_step() {
        let err = PublishError::new(PublishStep::Commit, "report-1.xml", "nothing to commit");
        let text = err.to_string();
        assert!(text.contains("commit"));
        assert!(text.contains("report-1.xml"));
    }

    #[test]
    fn test_watch_error_becomes_startup_error() {
        let err = TriggerError::Watch {
            path: PathBuf::from("/nope"),
            reason: "No such file or directory".to_string(),
        };
        match StartupError::from(err) {
            StartupError::WatchPath { path, .. } => assert_eq!(path, PathBuf::from("/nope")),
            other => panic!("unexpected {:?}", other),
        }
    }
}
