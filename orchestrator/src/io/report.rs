//! Human-facing text for a job: stop report and notification messages.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::types::{DecisionOutcome, JobStatus};

const STOP_REPORT_TEMPLATE: &str = include_str!("templates/stop_report.txt");
const STOP_MESSAGE_TEMPLATE: &str = include_str!("templates/stop_message.txt");
const RESUME_MESSAGE_TEMPLATE: &str = include_str!("templates/resume_message.txt");

/// Flattened job fields, with absent values spelled out.
#[derive(Debug, Serialize)]
struct JobView {
    job_id: String,
    updated_at: String,
    current_run: &'static str,
    run_goal: String,
    run_result: &'static str,
    stop_status: &'static str,
    stop_code: &'static str,
    stop_summary: String,
}

#[derive(Debug, Serialize)]
struct TransitionView {
    timestamp: String,
    summary: String,
    by: String,
    target: String,
    outcome: &'static str,
}

impl JobView {
    fn from_status(status: &JobStatus) -> Self {
        Self {
            job_id: status.job_id.clone(),
            updated_at: status.updated_at.to_rfc3339(),
            current_run: status.current_run.as_str(),
            run_goal: status.run_goal.clone(),
            run_result: status.run_result.as_str(),
            stop_status: status.stop.status.as_str(),
            stop_code: status.stop.stop_code.map_or("none", |code| code.as_str()),
            stop_summary: status.stop.summary.clone().unwrap_or_else(|| "none".to_string()),
        }
    }
}

pub struct ReportRenderer {
    env: Environment<'static>,
}

impl ReportRenderer {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.add_template("stop_report", STOP_REPORT_TEMPLATE)
            .context("load stop report template")?;
        env.add_template("stop_message", STOP_MESSAGE_TEMPLATE)
            .context("load stop message template")?;
        env.add_template("resume_message", RESUME_MESSAGE_TEMPLATE)
            .context("load resume message template")?;
        Ok(Self { env })
    }

    /// Full report written when a job terminates.
    pub fn stop_report(&self, status: &JobStatus) -> Result<String> {
        let transitions: Vec<TransitionView> = status
            .decision_transitions
            .iter()
            .map(|t| TransitionView {
                timestamp: t.timestamp.to_rfc3339(),
                summary: t.decision_summary.clone(),
                by: t.decision_by.clone(),
                target: t.decision_target.clone(),
                outcome: match t.outcome {
                    DecisionOutcome::Resume => "RESUME",
                    DecisionOutcome::Failed => "FAILED",
                },
            })
            .collect();
        self.render(
            "stop_report",
            context! { job => JobView::from_status(status), transitions => transitions },
        )
    }

    /// Notification text sent when a job enters STOP.
    pub fn stop_message(&self, status: &JobStatus) -> Result<String> {
        self.render(
            "stop_message",
            context! { job => JobView::from_status(status) },
        )
    }

    /// Notification text sent when a human decision resumes a job.
    pub fn resume_message(&self, status: &JobStatus) -> Result<String> {
        self.render(
            "resume_message",
            context! { job => JobView::from_status(status) },
        )
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String> {
        let template = self.env.get_template(name)?;
        let mut rendered = template
            .render(ctx)
            .with_context(|| format!("render {name}"))?;
        if !rendered.ends_with('\n') {
            rendered.push('\n');
        }
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::StopCode;
    use chrono::{TimeZone, Utc};

    fn halted() -> JobStatus {
        let t0 = Utc.timestamp_opt(1_700_000_000, 0).single().expect("ts");
        let mut status = JobStatus::new("job-7", "spec.md", t0);
        status
            .set_stop(
                StopCode::SpecMissing,
                "Missing required sections: output",
                t0 + chrono::Duration::seconds(1),
            )
            .expect("stop");
        status
    }

    #[test]
    fn stop_message_names_job_code_and_prompt() {
        let renderer = ReportRenderer::new().expect("renderer");
        let text = renderer.stop_message(&halted()).expect("render");
        assert!(text.contains("Job ID: job-7"));
        assert!(text.contains("Current Run: run0"));
        assert!(text.contains("Stop Code: SPEC_MISSING"));
        assert!(text.contains("Summary: Missing required sections: output"));
        assert!(text.contains("Please respond with Yes/No or 1/2"));
    }

    #[test]
    fn resume_message_names_run() {
        let renderer = ReportRenderer::new().expect("renderer");
        let text = renderer.resume_message(&halted()).expect("render");
        assert!(text.contains("Run: run0"));
        assert!(text.contains("Resumed by human decision"));
    }

    #[test]
    fn stop_report_lists_every_transition() {
        let renderer = ReportRenderer::new().expect("renderer");
        let mut status = halted();
        let t = status.updated_at + chrono::Duration::seconds(1);
        status.fail("Human rejected, marking as failed", t).expect("fail");

        let text = renderer.stop_report(&status).expect("render");
        assert!(text.contains("Run Result: FAILED"));
        assert!(text.contains("Status: terminal"));
        assert!(text.contains("  - 2023-11-14T22:13:22+00:00: Human rejected, marking as failed"));
        assert!(text.contains("    By: human, Target: SPEC_MISSING, Outcome: FAILED"));
        assert!(!text.contains("(none)"));
    }

    #[test]
    fn stop_report_without_transitions() {
        let renderer = ReportRenderer::new().expect("renderer");
        let text = renderer.stop_report(&halted()).expect("render");
        assert!(text.contains("  (none)"));
    }
}
