//! Warden daemon library
//!
//! Continuous compliance monitoring: trigger sources notice possible drift,
//! a condition battery confirms it, the remediation engine fixes it, and the
//! resulting report is committed to an evidence repository.

pub mod battery;
pub mod cli;
pub mod config;
pub mod inventory;
pub mod logging;
pub mod orchestrator;
pub mod publisher;
pub mod remediation;
pub mod shutdown;
pub mod supervisor;
pub mod trigger;
