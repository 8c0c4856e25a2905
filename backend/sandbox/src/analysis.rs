//! Command risk classification.
//!
//! Matching is plain substring containment. `rm` therefore also flags
//! `format` or `chroma`; false positives only cost the user one approval.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Catastrophic patterns. A match refuses the command outright.
pub static BLOCKED_PATTERNS: &[&str] = &[
    "rm -rf /",
    ":(){ :|:& };:", // fork bomb
    "mkfs",
    "dd if=",
];

/// Tokens that make a command need a one-shot approval.
pub static RISK_TOKENS: &[&str] = &[
    // privilege elevation
    "sudo",
    // deletion
    "rm",
    // permissions / ownership
    "chmod",
    "chown",
    // package managers
    "apt",
    "dnf",
    "pacman",
    // service and process control
    "systemctl",
    "service",
    "kill",
    // raw devices and mounts
    "dd",
    "mount",
    "cat /dev",
];

static DEFAULT_CLASSIFIER: Lazy<RiskClassifier> = Lazy::new(RiskClassifier::new);

/// Outcome class of [`RiskDecision`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskVerdict {
    Allowed,
    RequiresAuthorization,
    Blocked,
}

/// Per-command classification. Transient, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskDecision {
    pub blocked: bool,
    /// The blocklist entry that matched, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_by: Option<String>,
    /// Matched risk tokens in declaration order, without duplicates.
    pub risky_tokens: Vec<String>,
}

impl RiskDecision {
    pub fn is_risky(&self) -> bool {
        !self.risky_tokens.is_empty()
    }

    pub fn verdict(&self) -> RiskVerdict {
        if self.blocked {
            RiskVerdict::Blocked
        } else if self.is_risky() {
            RiskVerdict::RequiresAuthorization
        } else {
            RiskVerdict::Allowed
        }
    }
}

/// Blocklist plus risk-token scanner.
#[derive(Debug, Clone)]
pub struct RiskClassifier {
    blocked: Vec<String>,
    risk_tokens: Vec<String>,
}

impl RiskClassifier {
    /// Classifier with the built-in lists only.
    pub fn new() -> Self {
        Self::with_extra(&[], &[])
    }

    /// Built-in lists extended with operator-configured entries. Empty and
    /// repeated entries are ignored.
    pub fn with_extra(extra_blocked: &[String], extra_risk_tokens: &[String]) -> Self {
        Self {
            blocked: merge(BLOCKED_PATTERNS, extra_blocked),
            risk_tokens: merge(RISK_TOKENS, extra_risk_tokens),
        }
    }

    pub fn classify(&self, command: &str) -> RiskDecision {
        let blocked_by = self
            .blocked
            .iter()
            .find(|pattern| command.contains(pattern.as_str()))
            .cloned();

        let risky_tokens = self
            .risk_tokens
            .iter()
            .filter(|token| command.contains(token.as_str()))
            .cloned()
            .collect();

        RiskDecision {
            blocked: blocked_by.is_some(),
            blocked_by,
            risky_tokens,
        }
    }
}

impl Default for RiskClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Classify with the built-in lists.
pub fn classify(command: &str) -> RiskDecision {
    DEFAULT_CLASSIFIER.classify(command)
}

fn merge(builtin: &[&str], extra: &[String]) -> Vec<String> {
    let mut out: Vec<String> = builtin.iter().map(|s| s.to_string()).collect();
    for entry in extra {
        let entry = entry.trim();
        if !entry.is_empty() && !out.iter().any(|e| e == entry) {
            out.push(entry.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_command_is_allowed() {
        let decision = classify("ls -la /tmp");
        assert_eq!(decision.verdict(), RiskVerdict::Allowed);
        assert!(decision.risky_tokens.is_empty());
    }

    #[test]
    fn blocklist_wins_over_everything() {
        for cmd in [
            "rm -rf /",
            "sudo rm -rf / --no-preserve-root",
            ":(){ :|:& };:",
            "mkfs.ext4 /dev/sda1",
            "dd if=/dev/zero of=/dev/sda",
        ] {
            let decision = classify(cmd);
            assert!(decision.blocked, "{cmd} should be blocked");
            assert_eq!(decision.verdict(), RiskVerdict::Blocked);
        }
    }

    #[test]
    fn risky_tokens_in_declaration_order() {
        let decision = classify("sudo chown root file && rm file");
        assert!(!decision.blocked);
        assert_eq!(decision.risky_tokens, vec!["sudo", "rm", "chown"]);
        assert_eq!(decision.verdict(), RiskVerdict::RequiresAuthorization);
    }

    #[test]
    fn substring_matching_is_literal() {
        assert_eq!(classify("cat /dev/urandom").risky_tokens, vec!["cat /dev"]);
        assert_eq!(classify("pkill firefox").risky_tokens, vec!["kill"]);
        assert!(classify("echo hello").risky_tokens.is_empty());
    }

    #[test]
    fn extras_extend_builtins() {
        let classifier = RiskClassifier::with_extra(
            &["shutdown".to_string()],
            &["curl".to_string(), "".to_string()],
        );
        assert!(classifier.classify("shutdown -h now").blocked);
        assert_eq!(classifier.classify("curl example.com").risky_tokens, vec!["curl"]);
        assert!(!classifier.classify("ls").is_risky());
    }

    #[test]
    fn classification_is_deterministic() {
        let a = classify("sudo apt install htop");
        let b = classify("sudo apt install htop");
        assert_eq!(a, b);
    }
}
