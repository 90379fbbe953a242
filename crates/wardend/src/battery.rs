//! Condition battery for poll-based trigger sources
//!
//! Each condition is judged on its own observation only, in declaration
//! order. A query error counts as a failed check.

use crate::inventory::{Inventory, ProbeKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use warden_common::{ConditionOutcome, InventoryError, VerificationVerdict};

/// Polarity of a condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expectation {
    /// Fails when the target is absent
    Present,
    /// Fails when the target is present
    Absent,
}

/// A named predicate over live system state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub name: String,
    pub probe: ProbeKind,
    pub target: String,
    pub expect: Expectation,
}

impl Condition {
    pub fn present(probe: ProbeKind, target: &str) -> Self {
        Self {
            name: target.to_string(),
            probe,
            target: target.to_string(),
            expect: Expectation::Present,
        }
    }

    pub fn absent(probe: ProbeKind, target: &str) -> Self {
        Self {
            expect: Expectation::Absent,
            ..Self::present(probe, target)
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Judge one observation. Pure: no I/O happens here.
    pub fn judge(&self, observed: Result<bool, InventoryError>) -> ConditionOutcome {
        let present = match observed {
            Ok(present) => present,
            Err(e) => {
                return ConditionOutcome::fail(
                    &self.name,
                    format!("could not query {} {}: {}", self.probe, self.target, e),
                )
            }
        };

        match (self.expect, present) {
            (Expectation::Present, true) | (Expectation::Absent, false) => {
                ConditionOutcome::pass(&self.name)
            }
            (Expectation::Present, false) => {
                ConditionOutcome::fail(&self.name, self.describe(false))
            }
            (Expectation::Absent, true) => ConditionOutcome::fail(&self.name, self.describe(true)),
        }
    }

    fn describe(&self, present: bool) -> String {
        let state = match (self.probe, present) {
            (ProbeKind::Process, true) => "is running",
            (ProbeKind::Process, false) => "is not running",
            (ProbeKind::Service, true) => "is active",
            (ProbeKind::Service, false) => "is not active",
            (ProbeKind::Package, true) => "is installed",
            (ProbeKind::Package, false) => "is not installed",
        };
        format!("{} {} {}", self.probe, self.target, state)
    }
}

/// Ordered list of conditions sharing one inventory
pub struct ConditionBattery {
    conditions: Vec<Condition>,
    inventory: Arc<dyn Inventory>,
}

impl ConditionBattery {
    pub fn new(conditions: Vec<Condition>, inventory: Arc<dyn Inventory>) -> Self {
        Self {
            conditions,
            inventory,
        }
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Query every condition in declaration order and collect the verdict.
    pub async fn evaluate(&self) -> VerificationVerdict {
        let mut outcomes = Vec::with_capacity(self.conditions.len());
        for condition in &self.conditions {
            let observed = self
                .inventory
                .is_present(condition.probe, &condition.target)
                .await;
            let outcome = condition.judge(observed);
            debug!(
                condition = %outcome.name,
                passed = outcome.passed,
                "Condition evaluated"
            );
            outcomes.push(outcome);
        }
        VerificationVerdict::new(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::FakeInventory;

    #[test]
    fn test_presence_required() {
        let c = Condition::present(ProbeKind::Service, "auditd");
        assert!(c.judge(Ok(true)).passed);

        let failed = c.judge(Ok(false));
        assert!(!failed.passed);
        assert_eq!(failed.reason.as_deref(), Some("service auditd is not active"));
    }

    #[test]
    fn test_absence_required() {
        let c = Condition::absent(ProbeKind::Package, "telnet").named("no-telnet");
        assert!(c.judge(Ok(false)).passed);

        let failed = c.judge(Ok(true));
        assert_eq!(failed.name, "no-telnet");
        assert_eq!(failed.reason.as_deref(), Some("package telnet is installed"));
    }

    #[test]
    fn test_query_error_fails_both_polarities() {
        let err = InventoryError::NoPackageManager;
        assert!(!Condition::present(ProbeKind::Package, "aide").judge(Err(err.clone())).passed);

        let outcome = Condition::absent(ProbeKind::Package, "telnet").judge(Err(err));
        assert!(!outcome.passed);
        assert!(outcome.reason.unwrap().starts_with("could not query package telnet"));
    }

    #[tokio::test]
    async fn test_stable_system_never_needs_remediation() {
        let inventory = Arc::new(
            FakeInventory::new()
                .with(ProbeKind::Process, "auditd", true)
                .with(ProbeKind::Package, "telnet", false),
        );
        let battery = ConditionBattery::new(
            vec![
                Condition::present(ProbeKind::Process, "auditd"),
                Condition::absent(ProbeKind::Package, "telnet"),
            ],
            inventory,
        );

        for _ in 0..3 {
            assert!(!battery.evaluate().await.needs_remediation());
        }
    }

    #[tokio::test]
    async fn test_one_failure_flags_the_verdict() {
        let inventory = Arc::new(
            FakeInventory::new()
                .with(ProbeKind::Process, "auditd", true)
                .with(ProbeKind::Package, "telnet", true),
        );
        let battery = ConditionBattery::new(
            vec![
                Condition::present(ProbeKind::Process, "auditd"),
                Condition::absent(ProbeKind::Package, "telnet"),
            ],
            inventory,
        );

        let verdict = battery.evaluate().await;
        assert!(verdict.needs_remediation());
        assert_eq!(verdict.failures().count(), 1);
    }

    #[tokio::test]
    async fn test_evaluation_follows_declaration_order() {
        let inventory = Arc::new(FakeInventory::new().failing(ProbeKind::Service, "rsyslog"));
        let conditions = vec![
            Condition::present(ProbeKind::Service, "rsyslog"),
            Condition::absent(ProbeKind::Package, "rsh-server"),
            Condition::present(ProbeKind::Process, "auditd"),
        ];
        let battery = ConditionBattery::new(conditions.clone(), inventory.clone());

        let first = battery.evaluate().await;
        let second = battery.evaluate().await;
        assert_eq!(first, second);

        let names: Vec<&str> = first.outcomes.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["rsyslog", "rsh-server", "auditd"]);

        let queried: Vec<String> = inventory.queries().into_iter().map(|(_, t)| t).collect();
        assert_eq!(
            queried,
            vec!["rsyslog", "rsh-server", "auditd", "rsyslog", "rsh-server", "auditd"]
        );
    }

    #[tokio::test]
    async fn test_empty_battery_is_compliant() {
        let battery = ConditionBattery::new(vec![], Arc::new(FakeInventory::new()));
        assert!(battery.is_empty());
        assert!(!battery.evaluate().await.needs_remediation());
    }
}
