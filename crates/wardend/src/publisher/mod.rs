//! Evidence publisher
//!
//! Moves a report artifact into the evidence repository and runs one
//! place → stage → commit → push transaction. The first failing step ends
//! the transaction; nothing is rolled back, so the file stays wherever the
//! failed step left it.

pub mod git;

pub use git::{is_git_repo, FakeVcs, GitCli, Vcs, VcsOp};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use warden_common::{PublishError, PublishStep, ReportArtifact};

/// Where evidence goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishTarget {
    pub repo: PathBuf,
    pub branch: String,
    pub remote: String,
    /// Directory inside the repo for reports; empty means the repo root
    pub subdir: PathBuf,
}

impl PublishTarget {
    pub fn new(repo: impl Into<PathBuf>, branch: &str) -> Self {
        Self {
            repo: repo.into(),
            branch: branch.to_string(),
            remote: "origin".to_string(),
            subdir: PathBuf::new(),
        }
    }

    pub fn with_remote(mut self, remote: &str) -> Self {
        self.remote = remote.to_string();
        self
    }

    pub fn with_subdir(mut self, subdir: impl Into<PathBuf>) -> Self {
        self.subdir = subdir.into();
        self
    }
}

pub struct EvidencePublisher {
    vcs: Arc<dyn Vcs>,
    target: PublishTarget,
}

impl EvidencePublisher {
    pub fn new(vcs: Arc<dyn Vcs>, target: PublishTarget) -> Self {
        Self { vcs, target }
    }

    pub fn target(&self) -> &PublishTarget {
        &self.target
    }

    /// Publish one artifact on behalf of `source`. Returns the artifact's
    /// final path inside the repository.
    pub async fn publish(
        &self,
        artifact: &ReportArtifact,
        source: &str,
    ) -> Result<PathBuf, PublishError> {
        let name = artifact.file_name();
        let fail = |step: PublishStep, message: String| PublishError::new(step, &name, message);

        let relative = self.target.subdir.join(&name);
        let placed = self.target.repo.join(&relative);
        place(artifact.path(), &placed)
            .await
            .map_err(|e| fail(PublishStep::Place, e.to_string()))?;
        debug!(source, step = "place", "Placed {} at {}", name, placed.display());

        self.vcs
            .add(&self.target.repo, &relative)
            .await
            .map_err(|e| fail(PublishStep::Stage, e.to_string()))?;
        debug!(source, step = "stage", "Staged {}", relative.display());

        self.vcs
            .commit(&self.target.repo, &commit_message(artifact, source))
            .await
            .map_err(|e| fail(PublishStep::Commit, e.to_string()))?;
        debug!(source, step = "commit", "Committed {}", name);

        self.vcs
            .push(&self.target.repo, &self.target.remote, &self.target.branch)
            .await
            .map_err(|e| fail(PublishStep::Push, e.to_string()))?;

        info!(
            source,
            "Published {} to {}/{}",
            name,
            self.target.remote,
            self.target.branch
        );
        Ok(placed)
    }
}

/// Commit message for one artifact; names both the report and its trigger.
pub fn commit_message(artifact: &ReportArtifact, source: &str) -> String {
    format!(
        "Remediation report {} (trigger: {}, started {})",
        artifact.file_name(),
        source,
        artifact.started_at().format("%Y-%m-%d %H:%M:%S UTC")
    )
}

/// Move `from` to `to`, copying when a rename is impossible (e.g. across
/// filesystems).
async fn place(from: &Path, to: &Path) -> std::io::Result<()> {
    if from == to {
        return Ok(());
    }
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to).await?;
    tokio::fs::remove_file(from).await
}
