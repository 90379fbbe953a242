//! Process, service and package inventory
//!
//! Answers "is X present?" for the condition battery. Processes come from the
//! process table (sysinfo), services from systemd, packages from whichever
//! package manager the host has.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::sync::Mutex;
use sysinfo::System;
use tokio::process::Command;
use tracing::{debug, info, warn};
use warden_common::InventoryError;

/// What a condition asks the inventory about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    /// A running process, matched by executable name
    Process,
    /// An active systemd unit
    Service,
    /// An installed package
    Package,
}

impl ProbeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Process => "process",
            Self::Service => "service",
            Self::Package => "package",
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Inventory Trait
// ============================================================================

#[async_trait]
pub trait Inventory: Send + Sync {
    /// Whether `target` of the given kind is present right now
    async fn is_present(&self, kind: ProbeKind, target: &str) -> Result<bool, InventoryError>;
}

// ============================================================================
// System Inventory (Production)
// ============================================================================

/// Package database front-ends we know how to query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Dpkg,
    Rpm,
    Pacman,
}

impl PackageManager {
    /// First package manager found on PATH
    pub fn detect() -> Option<Self> {
        [Self::Dpkg, Self::Rpm, Self::Pacman]
            .into_iter()
            .find(|pm| which::which(pm.binary()).is_ok())
    }

    pub fn binary(&self) -> &'static str {
        match self {
            Self::Dpkg => "dpkg-query",
            Self::Rpm => "rpm",
            Self::Pacman => "pacman",
        }
    }

    fn query_args(&self, package: &str) -> Vec<String> {
        match self {
            Self::Dpkg => vec!["-W".into(), "-f=${Status}".into(), package.into()],
            Self::Rpm => vec!["-q".into(), "--quiet".into(), package.into()],
            Self::Pacman => vec!["-Q".into(), package.into()],
        }
    }

    /// Interpret a finished query. Non-zero exit means "not installed" for
    /// all three tools.
    fn installed(&self, success: bool, stdout: &str) -> bool {
        match self {
            // dpkg keeps removed-but-not-purged packages in its database
            Self::Dpkg => success && stdout.contains("install ok installed"),
            Self::Rpm | Self::Pacman => success,
        }
    }
}

pub struct SystemInventory {
    package_manager: Option<PackageManager>,
}

impl SystemInventory {
    pub fn new() -> Self {
        let package_manager = PackageManager::detect();
        match package_manager {
            Some(pm) => info!("Package queries will use {}", pm.binary()),
            None => warn!("No supported package manager found, package checks will fail"),
        }
        Self { package_manager }
    }

    pub fn with_package_manager(package_manager: Option<PackageManager>) -> Self {
        Self { package_manager }
    }

    async fn process_running(&self, name: &str) -> Result<bool, InventoryError> {
        let wanted = name.to_string();
        tokio::task::spawn_blocking(move || {
            let mut sys = System::new();
            sys.refresh_processes();
            sys.processes().values().any(|p| {
                p.name() == wanted
                    || p
                        .exe()
                        .and_then(Path::file_name)
                        .map(|f| f.to_string_lossy() == wanted)
                        .unwrap_or(false)
            })
        })
        .await
        .map_err(|e| InventoryError::Spawn {
            command: "process table scan".to_string(),
            reason: e.to_string(),
        })
    }

    async fn service_active(&self, unit: &str) -> Result<bool, InventoryError> {
        let args = vec!["is-active".to_string(), "--quiet".to_string(), unit.to_string()];
        let (success, _) = run_query("systemctl", &args).await?;
        Ok(success)
    }

    async fn package_installed(&self, package: &str) -> Result<bool, InventoryError> {
        let pm = self.package_manager.ok_or(InventoryError::NoPackageManager)?;
        let (success, stdout) = run_query(pm.binary(), &pm.query_args(package)).await?;
        Ok(pm.installed(success, &stdout))
    }
}

impl Default for SystemInventory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Inventory for SystemInventory {
    async fn is_present(&self, kind: ProbeKind, target: &str) -> Result<bool, InventoryError> {
        let present = match kind {
            ProbeKind::Process => self.process_running(target).await?,
            ProbeKind::Service => self.service_active(target).await?,
            ProbeKind::Package => self.package_installed(target).await?,
        };
        debug!(kind = %kind, target, present, "Inventory query");
        Ok(present)
    }
}

/// Run a query command, returning (exit success, stdout).
async fn run_query(program: &str, args: &[String]) -> Result<(bool, String), InventoryError> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| InventoryError::Spawn {
            command: format!("{} {}", program, args.join(" ")),
            reason: e.to_string(),
        })?;

    if output.status.code().is_none() {
        return Err(InventoryError::Unexpected {
            target: args.last().cloned().unwrap_or_default(),
            detail: format!("{} terminated by signal", program),
        });
    }

    Ok((
        output.status.success(),
        String::from_utf8_lossy(&output.stdout).into_owned(),
    ))
}

// ============================================================================
// Fake Inventory (Testing)
// ============================================================================

/// Inventory with pre-configured answers. Unknown targets are absent.
#[derive(Default)]
pub struct FakeInventory {
    answers: Mutex<HashMap<(ProbeKind, String), Result<bool, InventoryError>>>,
    queries: Mutex<Vec<(ProbeKind, String)>>,
}

impl FakeInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, kind: ProbeKind, target: &str, present: bool) -> Self {
        self.set(kind, target, present);
        self
    }

    pub fn failing(self, kind: ProbeKind, target: &str) -> Self {
        if let Ok(mut answers) = self.answers.lock() {
            answers.insert(
                (kind, target.to_string()),
                Err(InventoryError::Spawn {
                    command: format!("fake {} query", kind),
                    reason: "simulated failure".to_string(),
                }),
            );
        }
        self
    }

    /// Change an answer while the fake is shared
    pub fn set(&self, kind: ProbeKind, target: &str, present: bool) {
        if let Ok(mut answers) = self.answers.lock() {
            answers.insert((kind, target.to_string()), Ok(present));
        }
    }

    /// Every query in the order it was made
    pub fn queries(&self) -> Vec<(ProbeKind, String)> {
        self.queries.lock().map(|q| q.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Inventory for FakeInventory {
    async fn is_present(&self, kind: ProbeKind, target: &str) -> Result<bool, InventoryError> {
        if let Ok(mut queries) = self.queries.lock() {
            queries.push((kind, target.to_string()));
        }
        self.answers
            .lock()
            .ok()
            .and_then(|answers| answers.get(&(kind, target.to_string())).cloned())
            .unwrap_or(Ok(false))
    }
}
