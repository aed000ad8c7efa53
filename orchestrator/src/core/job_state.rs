//! Orchestrator-owned state transitions for `JobStatus`.
//!
//! Every mutation refreshes `updated_at` and refuses to touch a terminal job.
//! Persisting the result is the caller's job.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::core::types::{
    DecisionOutcome, DecisionTransition, JobStatus, Progress, Run, RunResult, StopCode, StopInfo,
    StopStatus,
};

/// Actor recorded on decisions read from the decision file.
pub const HUMAN_ACTOR: &str = "human";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("job {job_id} is terminal; no further transitions are allowed")]
    Terminal { job_id: String },
    #[error("job {job_id} is not halted (stop status {status})")]
    NotHalted { job_id: String, status: &'static str },
}

impl JobStatus {
    /// Fresh job positioned at `run0`.
    pub fn new(job_id: impl Into<String>, spec_path: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            job_id: job_id.into(),
            spec_path: spec_path.into(),
            created_at: now,
            updated_at: now,
            current_run: Run::Run0,
            run_goal: Run::Run0.goal().to_string(),
            run_result: RunResult::NotStarted,
            next_run: None,
            progress: Progress::default(),
            stop: StopInfo::default(),
            decision_transitions: Vec::new(),
            decision_ambiguity_count: 0,
        }
    }

    pub fn is_halted(&self) -> bool {
        self.stop.status == StopStatus::Active
    }

    pub fn is_terminal(&self) -> bool {
        self.stop.status == StopStatus::Terminal
    }

    /// True once the last run has reported `Go` and nothing follows it.
    pub fn is_complete(&self) -> bool {
        self.run_result == RunResult::Go
            && self.next_run.is_none()
            && self.current_run.next().is_none()
            && self.progress.step_name == STEP_COMPLETED
    }

    /// Halt the job awaiting a human decision.
    pub fn set_stop(
        &mut self,
        code: StopCode,
        summary: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.ensure_mutable()?;
        self.stop = StopInfo {
            status: StopStatus::Active,
            stop_code: Some(code),
            summary: Some(summary.into()),
        };
        self.run_result = RunResult::Stop;
        self.touch(now);
        Ok(())
    }

    /// Re-enter STOP because the decision input could not be understood.
    ///
    /// The job stays halted; no decision transition is appended.
    pub fn record_ambiguous_decision(
        &mut self,
        raw: &str,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.ensure_halted()?;
        self.decision_ambiguity_count += 1;
        self.set_stop(
            StopCode::AcceptanceAmbiguous,
            format!("Invalid decision value: {raw}. Expected Yes/No or 1/2"),
            now,
        )
    }

    /// Accept a RESUME decision: `stop.status=resolved`, `run_result=Go`.
    pub fn resume(&mut self, summary: &str, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.ensure_halted()?;
        self.push_decision(summary, DecisionOutcome::Resume, now);
        self.stop.status = StopStatus::Resolved;
        self.run_result = RunResult::Go;
        self.touch(now);
        Ok(())
    }

    /// Accept a FAILED decision. Irreversible.
    pub fn fail(&mut self, summary: &str, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.ensure_halted()?;
        self.push_decision(summary, DecisionOutcome::Failed, now);
        self.run_result = RunResult::Failed;
        self.stop.status = StopStatus::Terminal;
        self.touch(now);
        Ok(())
    }

    /// Mark the current run successful and name its successor.
    pub fn complete_run(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.ensure_mutable()?;
        self.run_result = RunResult::Go;
        self.next_run = self.current_run.next();
        self.progress.step_name = STEP_COMPLETED.to_string();
        self.touch(now);
        Ok(())
    }

    /// Move to `next_run` after a successful run. Returns the run entered.
    pub fn advance(&mut self, now: DateTime<Utc>) -> Result<Option<Run>, TransitionError> {
        self.ensure_mutable()?;
        if self.run_result != RunResult::Go {
            return Ok(None);
        }
        let Some(next) = self.next_run.take() else {
            return Ok(None);
        };
        self.current_run = next;
        self.run_goal = next.goal().to_string();
        self.run_result = RunResult::Pending;
        self.progress = Progress::default();
        self.touch(now);
        Ok(Some(next))
    }

    /// Record progress of the current run.
    pub fn set_progress(
        &mut self,
        step_name: &str,
        step_index: u32,
        total_steps: u32,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.ensure_mutable()?;
        self.run_goal = self.current_run.goal().to_string();
        self.progress = Progress {
            step_name: step_name.to_string(),
            step_index,
            total_steps,
        };
        if self.run_result == RunResult::NotStarted {
            self.run_result = RunResult::Pending;
        }
        self.touch(now);
        Ok(())
    }

    fn push_decision(&mut self, summary: &str, outcome: DecisionOutcome, now: DateTime<Utc>) {
        let target = self
            .stop
            .stop_code
            .map(|code| code.as_str().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        self.decision_transitions.push(DecisionTransition {
            decision_summary: summary.to_string(),
            decision_by: HUMAN_ACTOR.to_string(),
            decision_target: target,
            outcome,
            timestamp: now,
        });
    }

    fn ensure_mutable(&self) -> Result<(), TransitionError> {
        if self.is_terminal() {
            return Err(TransitionError::Terminal {
                job_id: self.job_id.clone(),
            });
        }
        Ok(())
    }

    fn ensure_halted(&self) -> Result<(), TransitionError> {
        self.ensure_mutable()?;
        if !self.is_halted() {
            return Err(TransitionError::NotHalted {
                job_id: self.job_id.clone(),
                status: self.stop.status.as_str(),
            });
        }
        Ok(())
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.updated_at {
            self.updated_at = now;
        }
    }
}

/// `progress.step_name` of a run whose handler finished successfully.
pub const STEP_COMPLETED: &str = "completed";

/// Check invariants of a loaded job status:
/// - `run_result == STOP` iff `stop.status == active`
/// - a terminal job has `run_result == FAILED`
/// - `updated_at` is not before `created_at`
pub fn validate_job_status(status: &JobStatus) -> Vec<String> {
    let mut errors = Vec::new();

    let stopped = status.run_result == RunResult::Stop;
    if stopped != status.is_halted() {
        errors.push(format!(
            "run_result {} inconsistent with stop.status {}",
            status.run_result.as_str(),
            status.stop.status.as_str()
        ));
    }

    if status.is_terminal() && status.run_result != RunResult::Failed {
        errors.push(format!(
            "terminal job must have run_result FAILED (got {})",
            status.run_result.as_str()
        ));
    }

    if status.updated_at < status.created_at {
        errors.push("updated_at precedes created_at".to_string());
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).single().expect("timestamp")
    }

    fn halted(code: StopCode) -> JobStatus {
        let mut status = JobStatus::new("job-1", "spec.md", at(0));
        status.set_stop(code, "needs a human", at(1)).expect("stop");
        status
    }

    #[test]
    fn set_stop_keeps_result_and_status_in_lockstep() {
        let status = halted(StopCode::SpecMissing);
        assert_eq!(status.run_result, RunResult::Stop);
        assert_eq!(status.stop.status, StopStatus::Active);
        assert_eq!(status.stop.stop_code, Some(StopCode::SpecMissing));
        assert_eq!(status.updated_at, at(1));
        assert_eq!(status.created_at, at(0));
        assert!(validate_job_status(&status).is_empty());
    }

    #[test]
    fn ambiguous_decision_stays_halted_without_transition() {
        let mut status = halted(StopCode::SpecMissing);
        status
            .record_ambiguous_decision("maybe", at(2))
            .expect("ambiguous");

        assert_eq!(status.stop.status, StopStatus::Active);
        assert_eq!(status.stop.stop_code, Some(StopCode::AcceptanceAmbiguous));
        assert_eq!(status.decision_ambiguity_count, 1);
        assert!(status.decision_transitions.is_empty());
        assert!(
            status
                .stop
                .summary
                .as_deref()
                .is_some_and(|s| s.contains("maybe"))
        );
    }

    #[test]
    fn resume_resolves_and_records_target() {
        let mut status = halted(StopCode::HumanDecisionRequired);
        status.resume("approved", at(3)).expect("resume");

        assert_eq!(status.stop.status, StopStatus::Resolved);
        assert_eq!(status.run_result, RunResult::Go);
        assert_eq!(status.decision_transitions.len(), 1);
        let transition = &status.decision_transitions[0];
        assert_eq!(transition.outcome, DecisionOutcome::Resume);
        assert_eq!(transition.decision_target, "HUMAN_DECISION_REQUIRED");
        assert_eq!(transition.decision_by, HUMAN_ACTOR);
        assert!(validate_job_status(&status).is_empty());
    }

    #[test]
    fn fail_is_terminal_and_irreversible() {
        let mut status = halted(StopCode::Rejection);
        status.fail("rejected", at(4)).expect("fail");
        assert!(status.is_terminal());
        assert_eq!(status.run_result, RunResult::Failed);

        let before = status.clone();
        assert!(matches!(
            status.set_stop(StopCode::SpecMissing, "again", at(5)),
            Err(TransitionError::Terminal { .. })
        ));
        assert!(status.resume("late", at(5)).is_err());
        assert!(status.complete_run(at(5)).is_err());
        assert_eq!(status, before);
    }

    #[test]
    fn resume_requires_active_stop() {
        let mut status = JobStatus::new("job-1", "spec.md", at(0));
        let err = status.resume("nothing to resume", at(1)).unwrap_err();
        assert!(matches!(err, TransitionError::NotHalted { .. }));
        assert!(status.decision_transitions.is_empty());
    }

    #[test]
    fn complete_then_advance_enters_next_run() {
        let mut status = JobStatus::new("job-1", "spec.md", at(0));
        status.complete_run(at(1)).expect("complete");
        assert_eq!(status.next_run, Some(Run::Run1));
        assert_eq!(status.progress.step_name, STEP_COMPLETED);

        let entered = status.advance(at(2)).expect("advance");
        assert_eq!(entered, Some(Run::Run1));
        assert_eq!(status.current_run, Run::Run1);
        assert_eq!(status.run_goal, "prototype");
        assert_eq!(status.run_result, RunResult::Pending);
        assert_eq!(status.next_run, None);

        assert_eq!(status.advance(at(3)).expect("advance"), None);
    }

    #[test]
    fn last_run_completes_job() {
        let mut status = JobStatus::new("job-1", "spec.md", at(0));
        status.current_run = Run::Run3;
        status.complete_run(at(1)).expect("complete");
        assert!(status.is_complete());
    }

    #[test]
    fn validate_reports_inconsistent_stop() {
        let mut status = JobStatus::new("job-1", "spec.md", at(0));
        status.run_result = RunResult::Stop;
        let errors = validate_job_status(&status);
        assert!(errors.iter().any(|e| e.contains("inconsistent")));
    }
}
