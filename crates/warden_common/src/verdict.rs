//! Verification verdicts produced by a condition battery.

use serde::{Deserialize, Serialize};

/// Result of one condition, in the order the battery declared it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionOutcome {
    pub name: String,
    pub passed: bool,
    /// Present only when the condition failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ConditionOutcome {
    pub fn pass(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            reason: None,
        }
    }

    pub fn fail(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Ordered outcomes plus the aggregate decision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationVerdict {
    pub outcomes: Vec<ConditionOutcome>,
}

impl VerificationVerdict {
    pub fn new(outcomes: Vec<ConditionOutcome>) -> Self {
        Self { outcomes }
    }

    /// True iff at least one condition failed.
    pub fn needs_remediation(&self) -> bool {
        self.outcomes.iter().any(|o| !o.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ConditionOutcome> {
        self.outcomes.iter().filter(|o| !o.passed)
    }

    /// One-line summary of failing reasons, for logs.
    pub fn summary(&self) -> String {
        let reasons: Vec<&str> = self
            .failures()
            .filter_map(|o| o.reason.as_deref())
            .collect();
        if reasons.is_empty() {
            format!("all {} checks passed", self.outcomes.len())
        } else {
            reasons.join("; ")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_verdict_is_compliant() {
        let verdict = VerificationVerdict::default();
        assert!(!verdict.needs_remediation());
        assert_eq!(verdict.summary(), "all 0 checks passed");
    }

    #[test]
    fn test_single_failure_needs_remediation() {
        let verdict = VerificationVerdict::new(vec![
            ConditionOutcome::pass("auditd"),
            ConditionOutcome::fail("telnet", "package telnet is installed"),
            ConditionOutcome::pass("rsyslogd"),
        ]);
        assert!(verdict.needs_remediation());
        assert_eq!(verdict.failures().count(), 1);
        assert_eq!(verdict.summary(), "package telnet is installed");
    }

    #[test]
    fn test_json_omits_reason_for_passing_checks() {
        let verdict = VerificationVerdict::new(vec![ConditionOutcome::pass("auditd")]);
        let json = serde_json::to_string(&verdict).unwrap();
        assert!(!json.contains("reason"));
    }
}
