//! Failing-check classification: auto-fixable or escalate.
//!
//! The whitelist is deliberately narrow and the default is escalation;
//! an unrecognised check name must never be auto-fixed.

/// Name patterns of checks the deterministic fixers know how to handle.
const AUTO_FIXABLE_PATTERNS: [&str; 6] = [
    "go-test",
    "go test",
    "go-build",
    "go build",
    "k8s-validate",
    "k8s validate",
];

/// Disposition of a failing check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    AutoFix,
    Escalate,
}

/// Whether a check name is on the auto-fix whitelist.
pub fn is_auto_fixable(check_name: &str) -> bool {
    let lower = check_name.to_lowercase();
    AUTO_FIXABLE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Classify a failing check by name.
pub fn classify(check_name: &str) -> Disposition {
    if is_auto_fixable(check_name) {
        Disposition::AutoFix
    } else {
        Disposition::Escalate
    }
}
