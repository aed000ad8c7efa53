//! Multi-step loop for `orchestrator loop`.

use anyhow::Result;
use tracing::{info, warn};

use crate::core::payload::Stage;
use crate::core::step_record::history_from;
use crate::core::types::NextPhase;
use crate::io::command_exec::CommandRunner;
use crate::io::step_ledger::{load_step_records, next_step_num};
use crate::pipeline::StageFailed;
use crate::step::{StepEngine, StepOutcome};

/// Reason why `run_loop` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// The done check passed.
    Done { step_num: u32, next_phase: NextPhase },
    /// A pipeline stage gave up; the step was recorded as an error.
    StageFailed { step_num: u32, stage: Stage },
    /// `max_steps` steps ran without the goal being met.
    MaxStepsReached { step_num: u32, max_steps: u32 },
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub started_at_step: u32,
    pub steps_executed: u32,
    pub stop: LoopStop,
}

/// Run steps until the goal is met, a stage fails, or `max_steps` steps
/// have run in this invocation.
///
/// Numbering and history continue from any records already in the ledger.
/// Errors other than a stage failure (ledger I/O) stop the loop immediately.
pub fn run_loop<R: CommandRunner, F: FnMut(&StepOutcome)>(
    engine: &StepEngine<R>,
    max_steps: u32,
    mut on_step: F,
) -> Result<LoopOutcome> {
    let (records, warnings) = load_step_records(engine.steps_dir())?;
    for warning in &warnings {
        warn!(%warning, "ignoring unreadable step record");
    }
    let mut history = history_from(&records);
    let started_at_step = next_step_num(engine.steps_dir())?;
    info!(started_at_step, max_steps, history = history.len(), "loop starting");

    let mut step_num = started_at_step;
    let mut steps_executed = 0u32;
    while steps_executed < max_steps {
        match engine.run_step(step_num, &history) {
            Ok(step) => {
                steps_executed += 1;
                on_step(&step);
                match step {
                    StepOutcome::Done { next_phase, .. } => {
                        return Ok(LoopOutcome {
                            started_at_step,
                            steps_executed,
                            stop: LoopStop::Done {
                                step_num,
                                next_phase,
                            },
                        });
                    }
                    executed @ StepOutcome::Executed { .. } => {
                        history.extend(executed.history_entry());
                    }
                }
            }
            Err(err) => {
                if let Some(failure) = err.downcast_ref::<StageFailed>() {
                    return Ok(LoopOutcome {
                        started_at_step,
                        steps_executed: steps_executed + 1,
                        stop: LoopStop::StageFailed {
                            step_num,
                            stage: failure.stage,
                        },
                    });
                }
                return Err(err);
            }
        }
        step_num += 1;
    }

    warn!(step_num, max_steps, "max steps reached without done");
    engine.record_max_steps(step_num, max_steps)?;
    Ok(LoopOutcome {
        started_at_step,
        steps_executed,
        stop: LoopStop::MaxStepsReached {
            step_num,
            max_steps,
        },
    })
}
