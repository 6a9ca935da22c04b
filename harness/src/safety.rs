//! Static screening of command text before it reaches a shell.
//!
//! This is a substring deny-list, not a sandbox: it catches the obvious
//! destructive or escalating forms a planner might emit and nothing more.

use model::{TestItem, TestPlan};
use serde::{Deserialize, Serialize};

/// Patterns matched case-insensitively against the whole command text.
pub const DANGEROUS_PATTERNS: &[&str] = &[
    "rm -rf",
    "sudo",
    "chmod 777",
    "dd if=",
    "mkfs",
    "fdisk",
    "format",
    "> /dev/",
    "| bash",
    "eval ",
    "exec ",
    "system(",
    "subprocess.call",
];

const SAFE_REASON: &str = "Command appears to be safe";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyVerdict {
    pub valid: bool,
    pub reason: String,
}

impl SafetyVerdict {
    fn safe() -> Self {
        Self {
            valid: true,
            reason: SAFE_REASON.to_string(),
        }
    }

    fn rejected(pattern: &str) -> Self {
        Self {
            valid: false,
            reason: format!("Command contains potentially dangerous pattern: {}", pattern),
        }
    }
}

/// An item that failed screening, with the reason it was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedItem {
    pub test_item_id: String,
    pub command: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct SafetyValidator {
    patterns: Vec<String>,
}

impl SafetyValidator {
    pub fn new() -> Self {
        Self {
            patterns: DANGEROUS_PATTERNS.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// Extend the deny-list. Patterns are stored lowercased.
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.push(pattern.into().to_lowercase());
        self
    }

    /// First matching pattern wins.
    pub fn validate(&self, command: &str) -> SafetyVerdict {
        let command = command.to_lowercase();
        self.patterns
            .iter()
            .find(|pattern| command.contains(pattern.as_str()))
            .map(|pattern| SafetyVerdict::rejected(pattern))
            .unwrap_or_else(SafetyVerdict::safe)
    }

    pub fn validate_item(&self, item: &TestItem) -> SafetyVerdict {
        self.validate(&item.command)
    }

    /// Screen every item of a plan, disabled ones included.
    pub fn validate_plan(&self, plan: &TestPlan) -> Vec<RejectedItem> {
        plan.test_items
            .iter()
            .filter_map(|item| {
                let verdict = self.validate_item(item);
                (!verdict.valid).then(|| RejectedItem {
                    test_item_id: item.id.clone(),
                    command: item.command.clone(),
                    reason: verdict.reason,
                })
            })
            .collect()
    }
}

impl Default for SafetyValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Screen a command with the built-in deny-list.
pub fn validate(command: &str) -> SafetyVerdict {
    SafetyValidator::new().validate(command)
}
