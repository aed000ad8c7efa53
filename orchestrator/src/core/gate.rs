//! Allowlist gate applied to every proposed command before execution.

use regex::{Regex, RegexBuilder};

use crate::core::types::GateVerdict;

/// Reason recorded for commands that pass the gate.
pub const ALLOW_REASON: &str = "passed allowlist";

/// Allow/deny policy over `(kind, code)`.
///
/// Rules, evaluated in order:
/// 1. `kind` must be one of `allowed_kinds`.
/// 2. `code` is matched case-insensitively against `deny_patterns` in
///    configured order; the first match denies.
/// 3. Otherwise the command is allowed.
#[derive(Debug, Clone)]
pub struct CommandGate {
    allowed_kinds: Vec<String>,
    deny_patterns: Vec<(String, Regex)>,
}

impl CommandGate {
    /// Compile the deny patterns. Fails on the first invalid pattern.
    pub fn new(allowed_kinds: &[String], deny_patterns: &[String]) -> Result<Self, regex::Error> {
        let compiled = deny_patterns
            .iter()
            .map(|pattern| {
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map(|regex| (pattern.clone(), regex))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            allowed_kinds: allowed_kinds.to_vec(),
            deny_patterns: compiled,
        })
    }

    pub fn evaluate(&self, kind: &str, code: &str) -> GateVerdict {
        if !self.allowed_kinds.iter().any(|allowed| allowed == kind) {
            return GateVerdict {
                allowed: false,
                reason: format!(
                    "kind '{kind}' is not allowed (allowed kinds: [{}])",
                    self.allowed_kinds.join(", ")
                ),
                matched_rule: None,
            };
        }

        for (pattern, regex) in &self.deny_patterns {
            if regex.is_match(code) {
                return GateVerdict {
                    allowed: false,
                    reason: format!("matched deny pattern '{pattern}'"),
                    matched_rule: Some(pattern.clone()),
                };
            }
        }

        GateVerdict {
            allowed: true,
            reason: ALLOW_REASON.to_string(),
            matched_rule: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(kinds: &[&str], patterns: &[&str]) -> CommandGate {
        let kinds: Vec<String> = kinds.iter().map(|s| s.to_string()).collect();
        let patterns: Vec<String> = patterns.iter().map(|s| s.to_string()).collect();
        CommandGate::new(&kinds, &patterns).expect("gate")
    }

    #[test]
    fn unknown_kind_cites_kind_and_allowed_set() {
        let gate = gate(&["powershell", "bash"], &[]);
        let verdict = gate.evaluate("cmd", "dir");
        assert!(!verdict.allowed);
        assert!(verdict.reason.contains("'cmd'"));
        assert!(verdict.reason.contains("powershell, bash"));
        assert_eq!(verdict.matched_rule, None);
    }

    #[test]
    fn kind_check_runs_before_patterns() {
        let gate = gate(&["bash"], &["rm"]);
        let verdict = gate.evaluate("python", "rm -rf /");
        assert!(!verdict.allowed);
        assert_eq!(verdict.matched_rule, None);
    }

    #[test]
    fn first_matching_pattern_wins() {
        let gate = gate(&["bash"], &[r"rm\s+-rf", "rm", "format"]);
        let verdict = gate.evaluate("bash", "RM -RF /tmp/x");
        assert!(!verdict.allowed);
        assert_eq!(verdict.matched_rule.as_deref(), Some(r"rm\s+-rf"));
        assert!(verdict.reason.contains(r"rm\s+-rf"));

        let verdict = gate.evaluate("bash", "rm file.txt");
        assert_eq!(verdict.matched_rule.as_deref(), Some("rm"));
    }

    #[test]
    fn matching_is_case_insensitive() {
        let gate = gate(&["powershell"], &["remove-item"]);
        let verdict = gate.evaluate("powershell", "Remove-Item -Recurse C:\\");
        assert!(!verdict.allowed);
    }

    #[test]
    fn allows_when_nothing_matches() {
        let gate = gate(&["powershell"], &["remove-item", "format"]);
        let verdict = gate.evaluate("powershell", "Get-ChildItem");
        assert!(verdict.allowed);
        assert_eq!(verdict.reason, ALLOW_REASON);
        assert_eq!(verdict.matched_rule, None);
    }

    #[test]
    fn evaluation_is_deterministic() {
        let gate = gate(&["bash"], &["curl", "wget"]);
        for code in ["curl x", "wget y", "echo ok", ""] {
            assert_eq!(gate.evaluate("bash", code), gate.evaluate("bash", code));
        }
    }

    #[test]
    fn invalid_pattern_is_rejected_at_construction() {
        let kinds = vec!["bash".to_string()];
        let patterns = vec!["(unclosed".to_string()];
        assert!(CommandGate::new(&kinds, &patterns).is_err());
    }
}
