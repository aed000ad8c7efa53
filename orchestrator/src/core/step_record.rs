//! Step record contract (`logs/steps/step_NNN.json`) and ledger aggregation.
//!
//! Every record serializes every key; absent values are written as `null`
//! so downstream tooling can rely on a fixed shape.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::payload::{DraftPayload, FinalPayload, ReviewPayload, Stage};
use crate::core::types::{CommandOutcome, CommandSpec, NextPhase};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPhase {
    Execute,
    Error,
    Done,
    MaxStepsReached,
}

impl StepPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            StepPhase::Execute => "execute",
            StepPhase::Error => "error",
            StepPhase::Done => "done",
            StepPhase::MaxStepsReached => "max_steps_reached",
        }
    }
}

impl fmt::Display for StepPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Models configured for each stage when the step ran.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelsUsed {
    pub draft: String,
    pub review: String,
    #[serde(rename = "final")]
    pub finalize: String,
}

/// The template and (truncated) rendered prompt sent for one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptUsage {
    pub template_name: String,
    pub prompt: String,
}

/// Gate verdict digest for one command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowlistEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub allowed: bool,
    pub reason: String,
    pub matched_pattern: Option<String>,
    pub executed: bool,
    pub returncode: Option<i32>,
    pub timeout: bool,
}

impl From<&CommandOutcome> for AllowlistEntry {
    fn from(outcome: &CommandOutcome) -> Self {
        Self {
            kind: outcome.kind.clone(),
            allowed: outcome.allowed,
            reason: outcome.reason.clone(),
            matched_pattern: outcome.matched_pattern.clone(),
            executed: outcome.executed,
            returncode: outcome.returncode,
            timeout: outcome.timeout,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Execution {
    pub command_results: Vec<CommandOutcome>,
}

/// One immutable entry of the step ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub phase: StepPhase,
    pub step_num: u32,
    pub timestamp: DateTime<Utc>,
    pub done: bool,
    pub done_reason: String,
    pub error: Option<String>,
    pub message: Option<String>,
    pub models_used: ModelsUsed,
    pub prompts_used: Option<BTreeMap<Stage, PromptUsage>>,
    pub final_commands: Option<Vec<CommandSpec>>,
    pub allowlist_summary: Option<Vec<AllowlistEntry>>,
    pub draft: Option<DraftPayload>,
    pub draft_raw: Option<String>,
    pub review: Option<ReviewPayload>,
    pub review_raw: Option<String>,
    #[serde(rename = "final")]
    pub finalize: Option<FinalPayload>,
    pub final_raw: Option<String>,
    pub execution: Option<Execution>,
    /// Repair re-prompts per stage (attempts beyond the first).
    pub repairs: Option<BTreeMap<Stage, u32>>,
    pub next_phase: Option<NextPhase>,
}

impl StepRecord {
    /// Record with only the identifying fields set.
    pub fn new(
        phase: StepPhase,
        step_num: u32,
        timestamp: DateTime<Utc>,
        models_used: ModelsUsed,
    ) -> Self {
        Self {
            phase,
            step_num,
            timestamp,
            done: phase == StepPhase::Done,
            done_reason: String::new(),
            error: None,
            message: None,
            models_used,
            prompts_used: None,
            final_commands: None,
            allowlist_summary: None,
            draft: None,
            draft_raw: None,
            review: None,
            review_raw: None,
            finalize: None,
            final_raw: None,
            execution: None,
            repairs: None,
            next_phase: None,
        }
    }

    /// Command outcomes of this step (empty when nothing was executed).
    pub fn command_results(&self) -> &[CommandOutcome] {
        self.execution
            .as_ref()
            .map(|execution| execution.command_results.as_slice())
            .unwrap_or_default()
    }
}

/// Aggregate view over all step records of a loop root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LedgerSummary {
    pub steps: usize,
    pub by_phase: BTreeMap<StepPhase, usize>,
    pub successful_steps: usize,
    pub error_steps: usize,
    pub commands: usize,
    pub denied_commands: usize,
    pub timed_out_commands: usize,
    pub failed_commands: usize,
    pub last_step: Option<u32>,
    pub done: bool,
    /// Next-phase bundle of the final done record, if the loop finished.
    pub next_phase: Option<NextPhase>,
}

/// Fold records (in step order) into a [`LedgerSummary`].
///
/// Pure and idempotent: the same records always yield the same summary.
pub fn summarize(records: &[StepRecord]) -> LedgerSummary {
    let mut summary = LedgerSummary::default();

    for record in records {
        summary.steps += 1;
        *summary.by_phase.entry(record.phase).or_insert(0) += 1;
        match record.phase {
            StepPhase::Execute | StepPhase::Done => summary.successful_steps += 1,
            StepPhase::Error => summary.error_steps += 1,
            StepPhase::MaxStepsReached => {}
        }

        for outcome in record.command_results() {
            summary.commands += 1;
            if !outcome.allowed {
                summary.denied_commands += 1;
            }
            if outcome.timeout {
                summary.timed_out_commands += 1;
            }
            if outcome.allowed && (!outcome.executed || outcome.returncode.is_some_and(|rc| rc != 0))
            {
                summary.failed_commands += 1;
            }
        }

        summary.last_step = Some(summary.last_step.map_or(record.step_num, |n| n.max(record.step_num)));
    }

    if let Some(done) = records
        .iter()
        .filter(|record| record.phase == StepPhase::Done)
        .max_by_key(|record| record.step_num)
    {
        summary.done = true;
        summary.next_phase = done.next_phase.clone();
    }

    summary
}

/// `{step, summary}` entries fed to the next draft prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub step: u32,
    pub summary: String,
}

/// History implied by executed steps, in step order.
pub fn history_from(records: &[StepRecord]) -> Vec<HistoryEntry> {
    records
        .iter()
        .filter(|record| record.phase == StepPhase::Execute)
        .map(|record| HistoryEntry {
            step: record.step_num,
            summary: record
                .finalize
                .as_ref()
                .and_then(|payload| payload.summary.clone())
                .unwrap_or_default(),
        })
        .collect()
}
