//! Shared deterministic types for orchestrator core logic.
//!
//! These types define the persisted contracts (`job_status.json`, step records)
//! and the values that flow between the gate, executor, and evaluator. They
//! carry no I/O and every transition takes its timestamp as an argument.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Named phase of a job's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Run {
    Run0,
    Run1,
    Run2,
    Run3,
}

impl Run {
    /// Goal label recorded in `run_goal` while this run is current.
    pub fn goal(self) -> &'static str {
        match self {
            Run::Run0 => "spec_audit",
            Run::Run1 => "prototype",
            Run::Run2 => "full_build",
            Run::Run3 => "hardening",
        }
    }

    /// The run that follows this one, if any.
    pub fn next(self) -> Option<Run> {
        match self {
            Run::Run0 => Some(Run::Run1),
            Run::Run1 => Some(Run::Run2),
            Run::Run2 => Some(Run::Run3),
            Run::Run3 => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Run::Run0 => "run0",
            Run::Run1 => "run1",
            Run::Run2 => "run2",
            Run::Run3 => "run3",
        }
    }
}

impl fmt::Display for Run {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the current run as seen by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunResult {
    #[serde(rename = "not_started")]
    NotStarted,
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "Go")]
    Go,
    #[serde(rename = "STOP")]
    Stop,
    #[serde(rename = "FAILED")]
    Failed,
}

impl RunResult {
    pub fn as_str(self) -> &'static str {
        match self {
            RunResult::NotStarted => "not_started",
            RunResult::Pending => "pending",
            RunResult::Go => "Go",
            RunResult::Stop => "STOP",
            RunResult::Failed => "FAILED",
        }
    }
}

/// Halt status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopStatus {
    None,
    Active,
    Resolved,
    Terminal,
}

impl StopStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StopStatus::None => "none",
            StopStatus::Active => "active",
            StopStatus::Resolved => "resolved",
            StopStatus::Terminal => "terminal",
        }
    }
}

/// Reason a job entered STOP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopCode {
    SpecMissing,
    AcceptanceAmbiguous,
    HumanDecisionRequired,
    Rejection,
}

impl StopCode {
    pub fn as_str(self) -> &'static str {
        match self {
            StopCode::SpecMissing => "SPEC_MISSING",
            StopCode::AcceptanceAmbiguous => "ACCEPTANCE_AMBIGUOUS",
            StopCode::HumanDecisionRequired => "HUMAN_DECISION_REQUIRED",
            StopCode::Rejection => "REJECTION",
        }
    }
}

impl fmt::Display for StopCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopInfo {
    pub status: StopStatus,
    pub stop_code: Option<StopCode>,
    pub summary: Option<String>,
}

impl Default for StopInfo {
    fn default() -> Self {
        Self {
            status: StopStatus::None,
            stop_code: None,
            summary: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub step_name: String,
    pub step_index: u32,
    pub total_steps: u32,
}

/// Outcome of a human decision that was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionOutcome {
    Resume,
    Failed,
}

/// One accepted human decision. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionTransition {
    pub decision_summary: String,
    pub decision_by: String,
    /// Stop code the decision answered (`unknown` when none was recorded).
    pub decision_target: String,
    pub outcome: DecisionOutcome,
    pub timestamp: DateTime<Utc>,
}

/// Persisted job status (`job_status.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: String,
    pub spec_path: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub current_run: Run,
    pub run_goal: String,
    pub run_result: RunResult,
    pub next_run: Option<Run>,
    pub progress: Progress,
    pub stop: StopInfo,
    pub decision_transitions: Vec<DecisionTransition>,
    /// Number of decision inputs that could not be normalised.
    #[serde(default)]
    pub decision_ambiguity_count: u32,
}

/// A `(kind, code)` command proposed by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub code: String,
}

/// Verdict of the command gate for one command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateVerdict {
    pub allowed: bool,
    pub reason: String,
    pub matched_rule: Option<String>,
}

/// Raw result of running one allowed command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    pub executed: bool,
    pub returncode: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timeout: bool,
    pub error: Option<String>,
}

/// Gate verdict plus execution result for one proposed command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutcome {
    #[serde(rename = "type")]
    pub kind: String,
    pub code: String,
    pub allowed: bool,
    pub reason: String,
    pub matched_pattern: Option<String>,
    pub executed: bool,
    pub returncode: Option<i32>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub timeout: bool,
    pub error: Option<String>,
}

impl CommandOutcome {
    /// Outcome for a command the gate refused. Nothing was executed.
    pub fn denied(spec: &CommandSpec, code: String, verdict: GateVerdict) -> Self {
        Self {
            kind: spec.kind.clone(),
            code,
            allowed: false,
            reason: verdict.reason,
            matched_pattern: verdict.matched_rule,
            executed: false,
            returncode: None,
            stdout: None,
            stderr: None,
            timeout: false,
            error: None,
        }
    }

    pub fn allowed(spec: &CommandSpec, code: String, verdict: GateVerdict, exec: ExecResult) -> Self {
        Self {
            kind: spec.kind.clone(),
            code,
            allowed: true,
            reason: verdict.reason,
            matched_pattern: None,
            executed: exec.executed,
            returncode: exec.returncode,
            stdout: Some(exec.stdout),
            stderr: Some(exec.stderr),
            timeout: exec.timeout,
            error: exec.error,
        }
    }
}

/// Structured "what to do next" bundle attached to a done verdict.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NextInstruction {
    pub id: String,
    pub summary: String,
    pub inputs: Vec<String>,
    pub expected_outputs: Vec<String>,
}

/// Descriptor of the phase that follows a satisfied goal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NextPhase {
    pub name: String,
    /// Completion condition of the next phase (a placeholder until defined).
    pub done_condition: String,
    pub instruction: NextInstruction,
}
