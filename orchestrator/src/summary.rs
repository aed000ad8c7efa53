//! Ledger aggregation for `orchestrator summary`.

use std::path::Path;

use anyhow::Result;

use crate::core::step_record::LedgerSummary;
use crate::io::step_ledger::aggregate;

/// Aggregate the ledger under `steps_dir` and render it as report lines.
///
/// Returns `(lines, warnings)`; warnings name records that were skipped.
pub fn ledger_report(steps_dir: &Path) -> Result<(Vec<String>, Vec<String>)> {
    let (summary, warnings) = aggregate(steps_dir)?;
    Ok((render_lines(&summary), warnings))
}

pub fn render_lines(summary: &LedgerSummary) -> Vec<String> {
    let mut lines = vec![
        format!(
            "summary: steps={} successful={} error={} last_step={}",
            summary.steps,
            summary.successful_steps,
            summary.error_steps,
            summary
                .last_step
                .map_or_else(|| "none".to_string(), |n| n.to_string())
        ),
        format!(
            "summary: commands={} denied={} timed_out={} failed={}",
            summary.commands,
            summary.denied_commands,
            summary.timed_out_commands,
            summary.failed_commands
        ),
    ];
    for (phase, count) in &summary.by_phase {
        lines.push(format!("summary: phase {phase} {count}"));
    }
    lines.push(format!("summary: done={}", summary.done));
    if let Some(next) = &summary.next_phase {
        lines.push(format!(
            "summary: next_phase={} instruction={} ({})",
            next.name, next.instruction.id, next.instruction.summary
        ));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::step_record::StepPhase;
    use crate::core::types::{NextInstruction, NextPhase};

    #[test]
    fn renders_counts_and_next_phase() {
        let mut summary = LedgerSummary {
            steps: 3,
            successful_steps: 2,
            error_steps: 1,
            commands: 4,
            denied_commands: 1,
            last_step: Some(3),
            done: true,
            next_phase: Some(NextPhase {
                name: "report".to_string(),
                done_condition: "TBD".to_string(),
                instruction: NextInstruction {
                    id: "report-001".to_string(),
                    summary: "write the report".to_string(),
                    ..NextInstruction::default()
                },
            }),
            ..LedgerSummary::default()
        };
        summary.by_phase.insert(StepPhase::Execute, 1);
        summary.by_phase.insert(StepPhase::Error, 1);
        summary.by_phase.insert(StepPhase::Done, 1);

        let lines = render_lines(&summary);
        assert_eq!(lines[0], "summary: steps=3 successful=2 error=1 last_step=3");
        assert_eq!(lines[1], "summary: commands=4 denied=1 timed_out=0 failed=0");
        assert!(lines.contains(&"summary: phase error 1".to_string()));
        assert!(lines.contains(&"summary: done=true".to_string()));
        assert_eq!(
            lines.last().map(String::as_str),
            Some("summary: next_phase=report instruction=report-001 (write the report)")
        );
    }

    #[test]
    fn empty_ledger_reports_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (lines, warnings) = ledger_report(temp.path()).expect("report");
        assert_eq!(lines[0], "summary: steps=0 successful=0 error=0 last_step=none");
        assert_eq!(lines.last().map(String::as_str), Some("summary: done=false"));
        assert!(warnings.is_empty());
    }
}
