//! Version-control client used to persist report artifacts.
//!
//! The working tree is expected to exist already with its remote and
//! credentials configured; nothing here sets them up.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;
use warden_common::VcsError;

/// No single git invocation may run longer than this
const GIT_TIMEOUT: Duration = Duration::from_secs(120);

// ============================================================================
// Vcs Trait
// ============================================================================

#[async_trait]
pub trait Vcs: Send + Sync {
    /// Stage `path` (relative to `repo`)
    async fn add(&self, repo: &Path, path: &Path) -> Result<(), VcsError>;

    /// Commit whatever is staged
    async fn commit(&self, repo: &Path, message: &str) -> Result<(), VcsError>;

    /// Push `branch` to `remote`
    async fn push(&self, repo: &Path, remote: &str, branch: &str) -> Result<(), VcsError>;
}

// ============================================================================
// Git CLI (Production)
// ============================================================================

#[derive(Debug, Default, Clone)]
pub struct GitCli;

impl GitCli {
    pub fn new() -> Self {
        Self
    }

    async fn run(&self, repo: &Path, operation: &str, args: &[&str]) -> Result<String, VcsError> {
        let mut cmd = Command::new("git");
        cmd.arg("-C")
            .arg(repo)
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("git -C {} {}", repo.display(), args.join(" "));

        let output = tokio::time::timeout(GIT_TIMEOUT, cmd.output())
            .await
            .map_err(|_| VcsError::new(operation, "timed out"))?
            .map_err(|e| VcsError::new(operation, format!("failed to run git: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            // "nothing to commit" is reported on stdout
            let detail = if stderr.is_empty() { stdout } else { stderr };
            return Err(VcsError::new(operation, detail));
        }
        Ok(stdout)
    }
}

#[async_trait]
impl Vcs for GitCli {
    async fn add(&self, repo: &Path, path: &Path) -> Result<(), VcsError> {
        let path = path.to_string_lossy();
        self.run(repo, "add", &["add", "--", path.as_ref()]).await?;
        Ok(())
    }

    async fn commit(&self, repo: &Path, message: &str) -> Result<(), VcsError> {
        self.run(repo, "commit", &["commit", "-m", message]).await?;
        Ok(())
    }

    async fn push(&self, repo: &Path, remote: &str, branch: &str) -> Result<(), VcsError> {
        self.run(repo, "push", &["push", remote, branch]).await?;
        Ok(())
    }
}

/// Check whether a directory is inside a git work tree.
pub async fn is_git_repo(dir: &Path) -> bool {
    GitCli::new()
        .run(dir, "rev-parse", &["rev-parse", "--is-inside-work-tree"])
        .await
        .map(|out| out == "true")
        .unwrap_or(false)
}

// ============================================================================
// Fake Vcs (Testing)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VcsOp {
    Add(PathBuf),
    Commit(String),
    Push { remote: String, branch: String },
}

/// Records operations; optionally fails one of them.
#[derive(Default)]
pub struct FakeVcs {
    ops: Mutex<Vec<VcsOp>>,
    fail_on: Option<&'static str>,
    delay: Duration,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl FakeVcs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every call to `operation` ("add", "commit" or "push")
    pub fn failing_on(mut self, operation: &'static str) -> Self {
        self.fail_on = Some(operation);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn ops(&self) -> Vec<VcsOp> {
        self.ops.lock().map(|o| o.clone()).unwrap_or_default()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    async fn record(&self, operation: &'static str, op: VcsOp) -> Result<(), VcsError> {
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Ok(mut ops) = self.ops.lock() {
            ops.push(op);
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.fail_on == Some(operation) {
            return Err(VcsError::new(operation, "simulated failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl Vcs for FakeVcs {
    async fn add(&self, _repo: &Path, path: &Path) -> Result<(), VcsError> {
        self.record("add", VcsOp::Add(path.to_path_buf())).await
    }

    async fn commit(&self, _repo: &Path, message: &str) -> Result<(), VcsError> {
        self.record("commit", VcsOp::Commit(message.to_string())).await
    }

    async fn push(&self, _repo: &Path, remote: &str, branch: &str) -> Result<(), VcsError> {
        self.record(
            "push",
            VcsOp::Push {
                remote: remote.to_string(),
                branch: branch.to_string(),
            },
        )
        .await
    }
}
