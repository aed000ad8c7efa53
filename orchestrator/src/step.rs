//! Orchestration for a single loop step.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::core::gate::CommandGate;
use crate::core::step_record::{
    AllowlistEntry, Execution, HistoryEntry, ModelsUsed, StepPhase, StepRecord,
};
use crate::core::types::{CommandOutcome, NextPhase};
use crate::io::command_exec::{CommandRunner, execute_commands};
use crate::io::config::OrchestratorConfig;
use crate::io::done::{DoneEvaluator, DoneVerdict};
use crate::io::layout::LoopPaths;
use crate::io::step_ledger::write_step_record;
use crate::pipeline::{PipelineSettings, StageBackends, StagePipeline};

/// Result of a step that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The done check passed before any backend call.
    Done {
        step_num: u32,
        reason: String,
        next_phase: NextPhase,
    },
    /// Final commands were gated and executed.
    Executed {
        step_num: u32,
        summary: String,
        outcomes: Vec<CommandOutcome>,
    },
}

impl StepOutcome {
    pub fn step_num(&self) -> u32 {
        match self {
            StepOutcome::Done { step_num, .. } | StepOutcome::Executed { step_num, .. } => {
                *step_num
            }
        }
    }

    /// History entry contributed to later draft prompts.
    pub fn history_entry(&self) -> Option<HistoryEntry> {
        match self {
            StepOutcome::Executed {
                step_num, summary, ..
            } => Some(HistoryEntry {
                step: *step_num,
                summary: summary.clone(),
            }),
            StepOutcome::Done { .. } => None,
        }
    }
}

/// Everything needed to run steps against one loop root.
pub struct StepEngine<R: CommandRunner> {
    pipeline: StagePipeline,
    gate: CommandGate,
    runner: R,
    done: DoneEvaluator,
    steps_dir: PathBuf,
    log_text_limit: usize,
}

impl<R: CommandRunner> StepEngine<R> {
    pub fn new(
        cfg: &OrchestratorConfig,
        paths: &LoopPaths,
        backends: StageBackends,
        runner: R,
    ) -> Result<Self> {
        Ok(Self {
            pipeline: StagePipeline::new(backends, PipelineSettings::from_config(cfg))?,
            gate: cfg.gate()?,
            runner,
            done: DoneEvaluator {
                target: paths.done_target.clone(),
                required_markers: cfg.done.required_markers.clone(),
                next_phase: cfg.done.next_phase.clone(),
            },
            steps_dir: paths.steps_dir.clone(),
            log_text_limit: cfg.log_text_limit,
        })
    }

    pub fn steps_dir(&self) -> &std::path::Path {
        &self.steps_dir
    }

    fn models(&self) -> ModelsUsed {
        self.pipeline.settings().models.clone()
    }

    /// Run step `step_num` and append its record to the ledger.
    ///
    /// The done check runs first; a satisfied goal ends the step without any
    /// backend call. A failed stage is recorded as `phase=error` and returned
    /// as a [`crate::pipeline::StageFailed`] error.
    #[instrument(skip_all, fields(step_num))]
    pub fn run_step(&self, step_num: u32, history: &[HistoryEntry]) -> Result<StepOutcome> {
        let not_done_reason = match self.done.evaluate() {
            DoneVerdict::Done { reason, next_phase } => {
                info!(%reason, next_phase = %next_phase.name, "goal satisfied");
                let mut record =
                    StepRecord::new(StepPhase::Done, step_num, Utc::now(), self.models());
                record.done_reason = reason.clone();
                record.message = Some(format!(
                    "Goal satisfied. Next phase: {} ({})",
                    next_phase.name, next_phase.instruction.id
                ));
                record.next_phase = Some(next_phase.clone());
                write_step_record(&self.steps_dir, &record)?;
                return Ok(StepOutcome::Done {
                    step_num,
                    reason,
                    next_phase,
                });
            }
            DoneVerdict::NotDone { reason, .. } => reason,
        };

        let report = self.pipeline.run(step_num, history);

        if let Some(failure) = report.failure.clone() {
            warn!(stage = %failure.stage, err = %failure, "step aborted");
            let mut record =
                StepRecord::new(StepPhase::Error, step_num, Utc::now(), self.models());
            record.done_reason = not_done_reason;
            record.error = Some(failure.to_string());
            record.message = Some(format!("{} stage failed", failure.stage));
            report.fill_record(&mut record, self.log_text_limit);
            write_step_record(&self.steps_dir, &record)
                .with_context(|| format!("record failed step {step_num}"))?;
            return Err(failure.into());
        }

        let (commands, summary) = report
            .finalize
            .as_ref()
            .map(|payload| {
                (
                    payload.final_commands.clone(),
                    payload.summary.clone().unwrap_or_default(),
                )
            })
            .unwrap_or_default();

        let outcomes = execute_commands(&self.gate, &self.runner, &commands);
        info!(
            commands = outcomes.len(),
            denied = outcomes.iter().filter(|o| !o.allowed).count(),
            "commands processed"
        );

        let mut record = StepRecord::new(StepPhase::Execute, step_num, Utc::now(), self.models());
        record.done_reason = not_done_reason;
        record.final_commands = Some(commands);
        record.allowlist_summary = Some(outcomes.iter().map(AllowlistEntry::from).collect());
        record.execution = Some(Execution {
            command_results: outcomes.clone(),
        });
        report.fill_record(&mut record, self.log_text_limit);
        write_step_record(&self.steps_dir, &record)?;

        Ok(StepOutcome::Executed {
            step_num,
            summary,
            outcomes,
        })
    }

    /// Append the record marking that the loop gave up.
    pub fn record_max_steps(&self, step_num: u32, max_steps: u32) -> Result<()> {
        let mut record = StepRecord::new(
            StepPhase::MaxStepsReached,
            step_num,
            Utc::now(),
            self.models(),
        );
        record.done_reason = format!("max_steps ({max_steps}) reached without done");
        record.message = Some(format!("Stopped after {max_steps} steps"));
        write_step_record(&self.steps_dir, &record)?;
        Ok(())
    }
}
