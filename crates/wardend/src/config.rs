//! Daemon configuration
//!
//! Optional TOML file; every field has a default, so an absent file and an
//! empty file behave the same.
//!
//! Lookup order: `--config <path>` (must exist), then /etc/warden/config.toml
//! if present, then built-in defaults.

use crate::battery::{Condition, ConditionBattery, Expectation};
use crate::inventory::{Inventory, ProbeKind};
use crate::supervisor::BackoffConfig;
use crate::trigger::{SourceKind, SourceSpec};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use warden_common::{EventMask, StartupError};

/// System-wide configuration file
pub const CONFIG_PATH: &str = "/etc/warden/config.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WardenConfig {
    /// Baseline profile passed to the remediation engine
    #[serde(default = "default_profile")]
    pub profile: String,

    /// Where reports are written before publishing
    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,

    #[serde(default)]
    pub remediation: RemediationSettings,

    #[serde(default)]
    pub publish: PublishSettings,

    #[serde(default)]
    pub poll: PollSettings,

    #[serde(default = "default_watches")]
    pub watch: Vec<WatchSettings>,

    #[serde(default)]
    pub supervisor: SupervisorSettings,
}

fn default_profile() -> String {
    "standard".to_string()
}

fn default_report_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            report_dir: default_report_dir(),
            remediation: RemediationSettings::default(),
            publish: PublishSettings::default(),
            poll: PollSettings::default(),
            watch: default_watches(),
            supervisor: SupervisorSettings::default(),
        }
    }
}

// ============================================================================
// Sections
// ============================================================================

/// External scan-and-fix engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationSettings {
    #[serde(default = "default_command")]
    pub command: String,

    /// Arguments placed before the remediate flag
    #[serde(default = "default_args")]
    pub args: Vec<String>,

    /// Kill the engine after this long (seconds)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Exit codes that count as a successful run
    #[serde(default = "default_accepted_exit_codes")]
    pub accepted_exit_codes: Vec<i32>,
}

fn default_command() -> String {
    "oscap".to_string()
}

fn default_args() -> Vec<String> {
    vec!["xccdf".to_string(), "eval".to_string()]
}

fn default_timeout() -> u64 {
    1800 // 30 minutes
}

fn default_accepted_exit_codes() -> Vec<i32> {
    vec![0]
}

impl Default for RemediationSettings {
    fn default() -> Self {
        Self {
            command: default_command(),
            args: default_args(),
            timeout_secs: default_timeout(),
            accepted_exit_codes: default_accepted_exit_codes(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishSettings {
    #[serde(default = "default_remote")]
    pub remote: String,

    /// Directory inside the evidence repository; empty means its root
    #[serde(default)]
    pub subdir: PathBuf,
}

fn default_remote() -> String {
    "origin".to_string()
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            remote: default_remote(),
            subdir: PathBuf::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollSettings {
    #[serde(default = "default_poll_label")]
    pub label: String,

    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_conditions")]
    pub conditions: Vec<ConditionSettings>,
}

fn default_poll_label() -> String {
    "service-poll".to_string()
}

fn default_interval() -> u64 {
    crate::trigger::poll::DEFAULT_POLL_INTERVAL_SECS
}

fn default_conditions() -> Vec<ConditionSettings> {
    vec![
        ConditionSettings::new(ProbeKind::Process, "auditd", Expectation::Present),
        ConditionSettings::new(ProbeKind::Process, "rsyslogd", Expectation::Present),
        ConditionSettings::new(ProbeKind::Package, "telnet", Expectation::Absent),
        ConditionSettings::new(ProbeKind::Package, "rsh-server", Expectation::Absent),
    ]
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            label: default_poll_label(),
            interval_secs: default_interval(),
            conditions: default_conditions(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionSettings {
    /// Defaults to the target
    #[serde(default)]
    pub name: Option<String>,
    pub probe: ProbeKind,
    pub target: String,
    pub expect: Expectation,
}

impl ConditionSettings {
    fn new(probe: ProbeKind, target: &str, expect: Expectation) -> Self {
        Self {
            name: None,
            probe,
            target: target.to_string(),
            expect,
        }
    }

    pub fn to_condition(&self) -> Condition {
        let condition = match self.expect {
            Expectation::Present => Condition::present(self.probe, &self.target),
            Expectation::Absent => Condition::absent(self.probe, &self.target),
        };
        match &self.name {
            Some(name) => condition.named(name),
            None => condition,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchSettings {
    pub label: String,
    pub root: PathBuf,

    /// Event names such as "attrib" or "close_write"
    pub events: Vec<String>,

    #[serde(default = "default_recursive")]
    pub recursive: bool,
}

fn default_recursive() -> bool {
    true
}

fn default_watches() -> Vec<WatchSettings> {
    vec![
        WatchSettings {
            label: "etc-attrib-watch".to_string(),
            root: PathBuf::from("/etc"),
            events: vec!["attrib".to_string()],
            recursive: true,
        },
        WatchSettings {
            label: "usr-bin-attrib-watch".to_string(),
            root: PathBuf::from("/usr/bin"),
            events: vec!["attrib".to_string()],
            recursive: true,
        },
    ]
}

impl WatchSettings {
    pub fn mask(&self) -> Result<EventMask, StartupError> {
        EventMask::parse(&self.events.join(",")).map_err(|e| {
            StartupError::Config(format!("watch '{}': {}", self.label, e))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorSettings {
    #[serde(default = "default_restart_initial_ms")]
    pub restart_initial_ms: u64,

    #[serde(default = "default_restart_max_secs")]
    pub restart_max_secs: u64,

    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_restart_initial_ms() -> u64 {
    500
}

fn default_restart_max_secs() -> u64 {
    60
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            restart_initial_ms: default_restart_initial_ms(),
            restart_max_secs: default_restart_max_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl SupervisorSettings {
    pub fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            initial: Duration::from_millis(self.restart_initial_ms),
            max: Duration::from_secs(self.restart_max_secs),
            ..BackoffConfig::default()
        }
    }

    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

// ============================================================================
// Loading
// ============================================================================

impl WardenConfig {
    /// Load from `explicit`, or from the system path, or fall back to defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, StartupError> {
        let path = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(StartupError::Config(format!(
                        "config file {} does not exist",
                        path.display()
                    )));
                }
                path.to_path_buf()
            }
            None => {
                let system = PathBuf::from(CONFIG_PATH);
                if !system.exists() {
                    return Ok(Self::default());
                }
                system
            }
        };

        let content = fs::read_to_string(&path).map_err(|e| {
            StartupError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
            .map_err(|e| StartupError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Parse and validate
    pub fn from_toml_str(content: &str) -> Result<Self, StartupError> {
        let config: Self =
            toml::from_str(content).map_err(|e| StartupError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), StartupError> {
        if self.profile.trim().is_empty() {
            return Err(StartupError::Config("profile must not be empty".to_string()));
        }
        if self.poll.interval_secs == 0 {
            return Err(StartupError::Config(
                "poll.interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.remediation.command.trim().is_empty() {
            return Err(StartupError::Config(
                "remediation.command must not be empty".to_string(),
            ));
        }

        // Reports are placed under the work tree, never outside it
        let subdir = &self.publish.subdir;
        if subdir.is_absolute()
            || subdir
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(StartupError::Config(format!(
                "publish.subdir must be a relative path inside the repository, got '{}'",
                subdir.display()
            )));
        }

        let mut labels = HashSet::new();
        labels.insert(self.poll.label.as_str());
        for watch in &self.watch {
            watch.mask()?;
            if !labels.insert(watch.label.as_str()) {
                return Err(StartupError::Config(format!(
                    "duplicate trigger source label '{}'",
                    watch.label
                )));
            }
        }
        Ok(())
    }

    pub fn conditions(&self) -> Vec<Condition> {
        self.poll.conditions.iter().map(ConditionSettings::to_condition).collect()
    }

    pub fn battery(&self, inventory: Arc<dyn Inventory>) -> ConditionBattery {
        ConditionBattery::new(self.conditions(), inventory)
    }

    /// The poll source followed by every watch, in file order.
    pub fn source_specs(
        &self,
        battery: Arc<ConditionBattery>,
    ) -> Result<Vec<SourceSpec>, StartupError> {
        let mut specs = vec![SourceSpec::poll(
            &self.poll.label,
            Duration::from_secs(self.poll.interval_secs),
            battery,
        )];
        for watch in &self.watch {
            specs.push(SourceSpec {
                label: watch.label.clone(),
                kind: SourceKind::PathWatch {
                    root: watch.root.clone(),
                    mask: watch.mask()?,
                    recursive: watch.recursive,
                },
            });
        }
        Ok(specs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::FakeInventory;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = WardenConfig::from_toml_str("").unwrap();
        assert_eq!(config, WardenConfig::default());
        assert_eq!(config.profile, "standard");
        assert_eq!(config.poll.interval_secs, 10);
        assert_eq!(config.remediation.accepted_exit_codes, vec![0]);
        assert_eq!(config.watch.len(), 2);
        assert_eq!(config.watch[0].label, "etc-attrib-watch");
        assert_eq!(config.watch[1].root, PathBuf::from("/usr/bin"));
    }

    #[test]
    fn test_default_conditions() {
        let conditions = WardenConfig::default().conditions();
        assert_eq!(conditions.len(), 4);
        assert_eq!(conditions[0], Condition::present(ProbeKind::Process, "auditd"));
        assert_eq!(conditions[3], Condition::absent(ProbeKind::Package, "rsh-server"));
    }

    #[test]
    fn test_full_file() {
        let config = WardenConfig::from_toml_str(
            r#"
profile = "cis"
report_dir = "/var/lib/warden"

[remediation]
command = "/usr/bin/oscap"
timeout_secs = 60
accepted_exit_codes = [0, 2]

[publish]
subdir = "reports"

[poll]
interval_secs = 30

[[poll.conditions]]
name = "audit daemon"
probe = "service"
target = "auditd"
expect = "present"

[[watch]]
label = "sshd-watch"
root = "/etc/ssh"
events = ["modify", "close_write"]
recursive = false

[supervisor]
shutdown_grace_secs = 3
"#,
        )
        .unwrap();

        assert_eq!(config.profile, "cis");
        assert_eq!(config.remediation.accepted_exit_codes, vec![0, 2]);
        assert_eq!(config.remediation.args, vec!["xccdf", "eval"]);
        assert_eq!(config.publish.remote, "origin");
        assert_eq!(config.publish.subdir, PathBuf::from("reports"));
        assert_eq!(config.poll.label, "service-poll");
        assert_eq!(config.watch.len(), 1);
        assert!(!config.watch[0].recursive);
        assert_eq!(config.supervisor.grace(), Duration::from_secs(3));

        let conditions = config.conditions();
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].name, "audit daemon");
        assert_eq!(conditions[0].probe, ProbeKind::Service);
    }

    #[test]
    fn test_validation_errors() {
        for bad in [
            "profile = \"\"",
            "[poll]\ninterval_secs = 0",
            "[[watch]]\nlabel = \"w\"\nroot = \"/etc\"\nevents = []",
            "[[watch]]\nlabel = \"w\"\nroot = \"/etc\"\nevents = [\"chmod\"]",
            "[[watch]]\nlabel = \"service-poll\"\nroot = \"/etc\"\nevents = [\"attrib\"]",
        ] {
            assert!(
                matches!(WardenConfig::from_toml_str(bad), Err(StartupError::Config(_))),
                "accepted: {}",
                bad
            );
        }
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let err = WardenConfig::load(Some(Path::new("/nonexistent/warden.toml"))).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "profile = \"pci-dss\"\n").unwrap();

        let config = WardenConfig::load(Some(&path)).unwrap();
        assert_eq!(config.profile, "pci-dss");
    }

    #[test]
    fn test_source_specs_poll_first() {
        let config = WardenConfig::default();
        let battery = Arc::new(config.battery(Arc::new(FakeInventory::new())));
        let specs = config.source_specs(battery).unwrap();

        let labels: Vec<_> = specs.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, ["service-poll", "etc-attrib-watch", "usr-bin-attrib-watch"]);
        assert!(specs[0].battery().is_some());
        assert!(specs[1].battery().is_none());
    }

    #[test]
    fn test_backoff_from_settings() {
        let backoff = SupervisorSettings::default().backoff();
        assert_eq!(backoff.initial, Duration::from_millis(500));
        assert_eq!(backoff.max, Duration::from_secs(60));
    }

    #[test]
    fn test_publish_subdir_must_stay_in_repository() {
        for subdir in ["/tmp/x", "../out", "reports/../../out"] {
            let toml = format!("[publish]\nsubdir = \"{}\"\n", subdir);
            assert!(
                matches!(WardenConfig::from_toml_str(&toml), Err(StartupError::Config(_))),
                "accepted subdir {}",
                subdir
            );
        }

        let config = WardenConfig::from_toml_str("[publish]\nsubdir = \"./evidence/2026\"\n").unwrap();
        assert_eq!(config.publish.subdir, PathBuf::from("./evidence/2026"));
    }
}
