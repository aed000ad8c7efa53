//! Job state machine: one `orchestrator run` invocation against a job
//! directory.
//!
//! Each invocation does at most one of: apply a pending human decision, run
//! the handler of the current run, or enter the next run. The status record
//! is written after every mutation.

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::core::decision::{Decision, normalize_decision};
use crate::core::spec_audit::{REQUIRED_SECTIONS, audit_spec};
use crate::core::types::{JobStatus, Run, StopCode};
use crate::io::job_store::{
    JobPaths, archive_decision, ensure_job_dir, load_job_status, read_decision,
    read_spec_document, write_job_status, write_stop_report,
};
use crate::io::notify::Notifier;
use crate::io::report::ReportRenderer;

pub const RESUME_SUMMARY: &str = "Human approved to continue";
pub const FAIL_SUMMARY: &str = "Human rejected, marking as failed";

/// What one invocation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvokeOutcome {
    /// The job is terminal; nothing was touched.
    AlreadyTerminal,
    /// Halted with no decision on file; nothing was touched.
    AwaitingDecision,
    /// The job (re-)entered STOP with this code.
    Stopped(StopCode),
    /// A FAILED decision terminated the job.
    Terminated,
    /// The handler of `run` succeeded.
    RunCompleted { run: Run, next_run: Option<Run> },
    /// The job entered `run`, which has no handler here.
    Entered(Run),
    /// Nothing to do (the job is complete, or the run has no handler).
    Idle,
}

pub struct JobMachine<'a> {
    paths: JobPaths,
    spec_path: PathBuf,
    status: JobStatus,
    notifier: &'a dyn Notifier,
    renderer: ReportRenderer,
}

impl<'a> JobMachine<'a> {
    /// Load the job at `job_dir`, creating and persisting a fresh status when
    /// none exists.
    #[instrument(skip_all, fields(job_dir = %job_dir.display()))]
    pub fn initialize(job_dir: &Path, spec_path: &Path, notifier: &'a dyn Notifier) -> Result<Self> {
        ensure_job_dir(job_dir)?;
        let paths = JobPaths::new(job_dir);
        let status = match load_job_status(&paths.status_path)? {
            Some(status) => {
                info!(job_id = %status.job_id, run = %status.current_run, "loaded existing job");
                status
            }
            None => {
                let status = JobStatus::new(
                    paths.job_id()?,
                    spec_path.display().to_string(),
                    Utc::now(),
                );
                write_job_status(&paths.status_path, &status)?;
                info!(job_id = %status.job_id, "created job");
                status
            }
        };
        Ok(Self {
            paths,
            spec_path: spec_path.to_path_buf(),
            status,
            notifier,
            renderer: ReportRenderer::new()?,
        })
    }

    pub fn status(&self) -> &JobStatus {
        &self.status
    }

    pub fn paths(&self) -> &JobPaths {
        &self.paths
    }

    #[instrument(skip_all, fields(job_id = %self.status.job_id))]
    pub fn invoke(&mut self) -> Result<InvokeOutcome> {
        if self.status.is_terminal() {
            info!("job is terminal, nothing to do");
            return Ok(InvokeOutcome::AlreadyTerminal);
        }

        if self.status.is_halted() {
            let Some(raw) = read_decision(&self.paths.decision_path)? else {
                info!("no human decision yet, staying halted");
                return Ok(InvokeOutcome::AwaitingDecision);
            };
            match normalize_decision(&raw) {
                Decision::Invalid(value) => {
                    warn!(%value, "invalid human decision");
                    let previous = self.status.stop.clone();
                    self.status.record_ambiguous_decision(&value, Utc::now())?;
                    self.persist()?;
                    // A decision file left in place is re-read on every
                    // invocation; notify once per distinct stop.
                    if previous == self.status.stop {
                        info!(
                            count = self.status.decision_ambiguity_count,
                            "unchanged invalid decision"
                        );
                    } else {
                        self.notify_stop();
                    }
                    return Ok(InvokeOutcome::Stopped(StopCode::AcceptanceAmbiguous));
                }
                Decision::Failed => {
                    info!("human decision: FAILED");
                    self.status.fail(FAIL_SUMMARY, Utc::now())?;
                    self.persist()?;
                    let report = self.renderer.stop_report(&self.status)?;
                    write_stop_report(&self.paths.stop_report_path, &report)?;
                    archive_decision(&self.paths)?;
                    return Ok(InvokeOutcome::Terminated);
                }
                Decision::Resume => {
                    info!("human decision: RESUME");
                    self.status.resume(RESUME_SUMMARY, Utc::now())?;
                    self.persist()?;
                    archive_decision(&self.paths)?;
                    self.notify(self.renderer.resume_message(&self.status));
                }
            }
        }

        self.execute_run()
    }

    fn execute_run(&mut self) -> Result<InvokeOutcome> {
        if self.status.is_complete() {
            return Ok(InvokeOutcome::Idle);
        }
        if let Some(run) = self.status.advance(Utc::now())? {
            info!(%run, goal = run.goal(), "entered next run");
            self.persist()?;
            return Ok(InvokeOutcome::Entered(run));
        }

        match self.status.current_run {
            Run::Run0 => self.run_spec_audit(),
            run => {
                info!(%run, next_run = ?self.status.next_run, "no handler for run");
                Ok(InvokeOutcome::Idle)
            }
        }
    }

    /// run0: the spec document must contain every required section.
    fn run_spec_audit(&mut self) -> Result<InvokeOutcome> {
        info!(spec = %self.spec_path.display(), "executing spec audit");
        self.status
            .set_progress(Run::Run0.goal(), 1, 1, Utc::now())?;
        self.persist()?;

        let document = match read_spec_document(&self.spec_path) {
            Ok(document) => document,
            Err(err) => return self.stop(StopCode::SpecMissing, format!("{err:#}")),
        };
        let report = audit_spec(&document, REQUIRED_SECTIONS);
        if !report.passed() {
            return self.stop(StopCode::SpecMissing, report.summary);
        }

        info!(summary = %report.summary, "spec audit passed");
        self.status.complete_run(Utc::now())?;
        self.persist()?;
        Ok(InvokeOutcome::RunCompleted {
            run: Run::Run0,
            next_run: self.status.next_run,
        })
    }

    fn stop(&mut self, code: StopCode, summary: String) -> Result<InvokeOutcome> {
        warn!(%code, %summary, "job halted");
        self.status.set_stop(code, summary, Utc::now())?;
        self.persist()?;
        self.notify_stop();
        Ok(InvokeOutcome::Stopped(code))
    }

    fn persist(&self) -> Result<()> {
        write_job_status(&self.paths.status_path, &self.status)
    }

    fn notify_stop(&self) {
        self.notify(self.renderer.stop_message(&self.status));
    }

    /// Delivery failures are logged and never change the job.
    fn notify(&self, message: Result<String>) {
        let result = message.and_then(|text| {
            self.notifier
                .notify(&text)
                .map_err(anyhow::Error::from)
        });
        match result {
            Ok(delivery) => info!(?delivery, "notification handled"),
            Err(err) => warn!(err = %format!("{err:#}"), "notification failed"),
        }
    }
}
