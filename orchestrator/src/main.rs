//! Human-supervised task-automation loop.
//!
//! `run` drives a job directory through its runs and STOP decisions; `loop`
//! runs draft/review/finalize steps against a loop root until the done check
//! passes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};

use orchestrator::exit_codes;
use orchestrator::io::command_exec::ShellRunner;
use orchestrator::io::config::{OrchestratorConfig, load_config, write_config};
use orchestrator::io::job_store::{JobPaths, load_job_status};
use orchestrator::io::layout::{LoopPaths, ensure_layout};
use orchestrator::io::notify::WebhookNotifier;
use orchestrator::job::JobMachine;
use orchestrator::logging;
use orchestrator::looping::{LoopStop, run_loop};
use orchestrator::pipeline::StageBackends;
use orchestrator::step::{StepEngine, StepOutcome};
use orchestrator::summary::ledger_report;

#[derive(Parser)]
#[command(
    name = "orchestrator",
    version,
    about = "Human-supervised task-automation loop"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Advance a job by one invocation (decision, run handler, or next run).
    Run {
        /// Job directory; its name is the job id.
        #[arg(long)]
        job: PathBuf,
        /// Specification document audited by run0.
        #[arg(long)]
        spec: PathBuf,
        /// Config file (defaults apply when missing).
        #[arg(long, default_value = "orchestrator.toml")]
        config: PathBuf,
    },
    /// Create the loop layout and a default config under a loop root.
    Init {
        #[arg(long, default_value = ".")]
        root: PathBuf,
        /// Overwrite an existing config file.
        #[arg(long)]
        force: bool,
    },
    /// Print the persisted job status.
    Status {
        #[arg(long)]
        job: PathBuf,
    },
    /// Run steps until the goal is met, a stage fails, or max steps.
    Loop {
        /// Loop root holding the workspace and logs.
        #[arg(long, default_value = ".")]
        root: PathBuf,
        /// Config file (defaults to `<root>/orchestrator.toml`).
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Aggregate the step records of a loop root.
    Summary {
        #[arg(long, default_value = ".")]
        root: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run { job, spec, config } => cmd_run(&job, &spec, &config),
        Command::Init { root, force } => cmd_init(&root, force),
        Command::Status { job } => cmd_status(&job),
        Command::Loop { root, config } => cmd_loop(&root, config.as_deref()),
        Command::Summary { root, config } => cmd_summary(&root, config.as_deref()),
    }
}

fn loop_config(root: &Path, config: Option<&Path>) -> Result<OrchestratorConfig> {
    let path = config.map_or_else(|| LoopPaths::config_path(root), Path::to_path_buf);
    load_config(&path)
}

fn cmd_run(job_dir: &Path, spec: &Path, config: &Path) -> Result<i32> {
    let cfg = load_config(config)?;
    let notifier = WebhookNotifier::new(
        cfg.notify.resolved_webhook_url(),
        Duration::from_secs(cfg.notify.timeout_secs),
    );
    let mut machine = JobMachine::initialize(job_dir, spec, &notifier)?;
    let outcome = machine.invoke()?;
    let status = machine.status();

    println!("run: job={} outcome={:?}", status.job_id, outcome);
    println!(
        "run: current_run={} goal={} result={} next_run={}",
        status.current_run,
        status.run_goal,
        status.run_result.as_str(),
        status.next_run.map_or("none", |run| run.as_str())
    );
    if let Some(code) = status.stop.stop_code {
        println!(
            "run: stop={} code={} summary={}",
            status.stop.status.as_str(),
            code,
            status.stop.summary.as_deref().unwrap_or("")
        );
    }

    Ok(if status.is_terminal() {
        exit_codes::FAILED
    } else if status.is_halted() {
        exit_codes::HALTED
    } else {
        exit_codes::OK
    })
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let config_path = LoopPaths::config_path(root);
    let cfg = if config_path.exists() && !force {
        println!("init: keeping {}", config_path.display());
        load_config(&config_path)?
    } else {
        let cfg = OrchestratorConfig::default();
        write_config(&config_path, &cfg)?;
        println!("init: wrote {}", config_path.display());
        cfg
    };
    ensure_layout(&LoopPaths::new(root, &cfg))?;
    Ok(exit_codes::OK)
}

fn cmd_status(job_dir: &Path) -> Result<i32> {
    let paths = JobPaths::new(job_dir);
    let status = load_job_status(&paths.status_path)?
        .ok_or_else(|| anyhow!("no job status at {}", paths.status_path.display()))?;
    let json = serde_json::to_string_pretty(&status).context("serialize job status")?;
    println!("{json}");
    Ok(exit_codes::OK)
}

fn cmd_loop(root: &Path, config: Option<&Path>) -> Result<i32> {
    let cfg = loop_config(root, config)?;
    let paths = LoopPaths::new(root, &cfg);
    ensure_layout(&paths)?;

    let backends = StageBackends::from_config(&cfg)?;
    let runner = ShellRunner {
        interpreters: cfg.interpreters.clone(),
        workdir: paths.workspace_dir.clone(),
        timeout: Duration::from_secs(cfg.timeout_secs),
        output_limit_bytes: cfg.output_limit_bytes,
    };
    let engine = StepEngine::new(&cfg, &paths, backends, runner)?;

    let outcome = run_loop(&engine, cfg.max_steps, |step| match step {
        StepOutcome::Done {
            step_num, reason, ..
        } => println!("step {step_num}: done ({reason})"),
        StepOutcome::Executed {
            step_num,
            summary,
            outcomes,
        } => {
            let denied = outcomes.iter().filter(|o| !o.allowed).count();
            println!(
                "step {step_num}: executed {} command(s), {denied} denied: {summary}",
                outcomes.len()
            );
        }
    })?;

    Ok(match outcome.stop {
        LoopStop::Done {
            step_num,
            next_phase,
        } => {
            println!(
                "loop: done at step {step_num}; next phase {} ({})",
                next_phase.name, next_phase.instruction.id
            );
            exit_codes::OK
        }
        LoopStop::StageFailed { step_num, stage } => {
            eprintln!("loop: {stage} stage failed at step {step_num}");
            exit_codes::INVALID
        }
        LoopStop::MaxStepsReached {
            step_num,
            max_steps,
        } => {
            println!("loop: max steps ({max_steps}) reached; recorded step {step_num}");
            exit_codes::MAX_STEPS
        }
    })
}

fn cmd_summary(root: &Path, config: Option<&Path>) -> Result<i32> {
    let cfg = loop_config(root, config)?;
    let paths = LoopPaths::new(root, &cfg);
    let (lines, warnings) = ledger_report(&paths.steps_dir)?;
    for line in lines {
        println!("{line}");
    }
    for warning in warnings {
        eprintln!("warning: {}", warning);
    }
    Ok(exit_codes::OK)
}
