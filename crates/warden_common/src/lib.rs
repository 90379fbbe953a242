//! Warden Common - Shared types for the Warden compliance guardian
//!
//! Verdicts, trigger events, report artifacts and the error taxonomy used by
//! the daemon and its tests.

pub mod error;
pub mod event;
pub mod report;
pub mod verdict;

pub use error::*;
pub use event::{EventMask, TriggerEvent, WatchEventKind};
pub use report::{report_file_name, report_stem, ReportArtifact, ReportNamer};
pub use verdict::{ConditionOutcome, VerificationVerdict};
