//! Minimal structural audit of a job's specification document.

use regex::RegexBuilder;

/// A section every specification document must contain, with the labels
/// accepted for it.
#[derive(Debug, Clone, Copy)]
pub struct RequiredSection {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
}

pub const REQUIRED_SECTIONS: &[RequiredSection] = &[
    RequiredSection {
        name: "purpose",
        aliases: &["purpose", "目的"],
    },
    RequiredSection {
        name: "input",
        aliases: &["input", "入力"],
    },
    RequiredSection {
        name: "output",
        aliases: &["output", "出力"],
    },
    RequiredSection {
        name: "rules",
        aliases: &["rules", "ルール"],
    },
    RequiredSection {
        name: "environment",
        aliases: &["environment", "環境"],
    },
    RequiredSection {
        name: "completion_criteria",
        aliases: &["completion_criteria", "完成条件"],
    },
    RequiredSection {
        name: "prohibited",
        aliases: &["prohibited", "禁止"],
    },
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditReport {
    pub missing: Vec<&'static str>,
    pub summary: String,
}

impl AuditReport {
    pub fn passed(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Check `document` for every entry of `sections`.
pub fn audit_spec(document: &str, sections: &[RequiredSection]) -> AuditReport {
    let missing: Vec<&'static str> = sections
        .iter()
        .filter(|section| !section.aliases.iter().any(|alias| has_label(document, alias)))
        .map(|section| section.name)
        .collect();

    let summary = if missing.is_empty() {
        "All required sections found".to_string()
    } else {
        format!("Missing required sections: {}", missing.join(", "))
    };
    AuditReport { missing, summary }
}

/// True when some line labels `alias`: `## alias`, `alias:`, `[alias]`, or
/// `alias` alone.
fn has_label(document: &str, alias: &str) -> bool {
    let alias = regex::escape(alias);
    let patterns = [
        format!(r"^#+\s*{alias}\s*$"),
        format!(r"^{alias}\s*[:：]"),
        format!(r"^\[{alias}\]"),
        format!(r"^{alias}\s*$"),
    ];
    patterns.iter().any(|pattern| {
        RegexBuilder::new(pattern)
            .multi_line(true)
            .case_insensitive(true)
            .build()
            .is_ok_and(|re| re.is_match(document))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = "\
# Purpose
Summarise sales.

## Input
sales.csv

Output: result_v2.txt
[rules]
no network
environment
completion_criteria: totals present
### PROHIBITED
";

    #[test]
    fn all_sections_found() {
        let report = audit_spec(FULL, REQUIRED_SECTIONS);
        assert!(report.passed(), "{:?}", report.missing);
        assert_eq!(report.summary, "All required sections found");
    }

    #[test]
    fn lists_missing_sections_in_order() {
        let doc = FULL.replace("Output: result_v2.txt\n", "").replace("environment\n", "");
        let report = audit_spec(&doc, REQUIRED_SECTIONS);
        assert_eq!(report.missing, vec!["output", "environment"]);
        assert_eq!(
            report.summary,
            "Missing required sections: output, environment"
        );
    }

    #[test]
    fn japanese_aliases_count() {
        let doc = "# 目的\n## 入力\n出力：集計\n[ルール]\n環境\n完成条件: 合計\n禁止\n";
        assert!(audit_spec(doc, REQUIRED_SECTIONS).passed());
    }

    #[test]
    fn mention_inside_prose_is_not_a_label() {
        let doc = "The purpose of this input is to describe the output.";
        let report = audit_spec(doc, REQUIRED_SECTIONS);
        assert_eq!(report.missing.len(), REQUIRED_SECTIONS.len());
    }
}
