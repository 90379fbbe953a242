//! Report artifacts and their names.
//!
//! Names are derived from the run's start time at second resolution plus a
//! process-wide sequence number, so two runs started within the same second
//! still get distinct files.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

const REPORT_PREFIX: &str = "report";
const REPORT_EXTENSION: &str = "xml";
const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// A report file written by one remediation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportArtifact {
    path: PathBuf,
    started_at: DateTime<Utc>,
}

impl ReportArtifact {
    pub fn new(path: PathBuf, started_at: DateTime<Utc>) -> Self {
        Self { path, started_at }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// File name without directories, used in commit messages and logs
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Hands out unique report paths inside one directory.
#[derive(Debug)]
pub struct ReportNamer {
    dir: PathBuf,
    sequence: AtomicU64,
}

impl ReportNamer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reserve the next report path for a run started at `started_at`.
    pub fn next_path(&self, started_at: DateTime<Utc>) -> PathBuf {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        self.dir.join(report_file_name(started_at, seq))
    }
}

/// `report-YYYYmmdd-HHMMSS-NNNN.xml`
pub fn report_file_name(started_at: DateTime<Utc>, seq: u64) -> String {
    format!(
        "{}-{}-{:04}.{}",
        REPORT_PREFIX,
        started_at.format(TIMESTAMP_FORMAT),
        seq,
        REPORT_EXTENSION
    )
}

/// Timestamp portion shared by every report of a run started at `started_at`.
pub fn report_stem(started_at: DateTime<Utc>) -> String {
    format!("{}-{}", REPORT_PREFIX, started_at.format(TIMESTAMP_FORMAT))
}
