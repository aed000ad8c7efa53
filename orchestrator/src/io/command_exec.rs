//! Gate-then-execute for the commands of one step.
//!
//! The [`CommandRunner`] trait decouples step orchestration from process
//! spawning. Tests use scripted runners that return canned results.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::core::gate::CommandGate;
use crate::core::text::truncate_text;
use crate::core::types::{CommandOutcome, CommandSpec, ExecResult};
use crate::io::process::run_with_timeout;

/// Bytes of command code kept in an outcome for a denied command.
const DENIED_CODE_LIMIT: usize = 200;
/// Bytes of command code kept in an outcome for an allowed command.
const ALLOWED_CODE_LIMIT: usize = 500;

/// Runs one command that already passed the gate.
///
/// Implementations never fail: launch errors, timeouts and non-zero exits are
/// all reported through [`ExecResult`].
pub trait CommandRunner {
    fn run(&self, spec: &CommandSpec) -> ExecResult;
}

/// Runs commands through the configured interpreter for their kind.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    pub interpreters: BTreeMap<String, Vec<String>>,
    pub workdir: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

impl CommandRunner for ShellRunner {
    #[instrument(skip_all, fields(kind = %spec.kind))]
    fn run(&self, spec: &CommandSpec) -> ExecResult {
        let Some((program, args)) = self
            .interpreters
            .get(&spec.kind)
            .and_then(|argv| argv.split_first())
        else {
            return ExecResult {
                error: Some(format!("no interpreter configured for kind '{}'", spec.kind)),
                ..ExecResult::default()
            };
        };

        let mut cmd = Command::new(program);
        cmd.args(args).arg(&spec.code).current_dir(&self.workdir);

        match run_with_timeout(cmd, self.timeout, self.output_limit_bytes) {
            Ok(output) if output.timed_out => ExecResult {
                executed: true,
                returncode: None,
                stdout: output.stdout_text(),
                stderr: output.stderr_text(),
                timeout: true,
                error: Some(format!("timed out after {}s", self.timeout.as_secs())),
            },
            Ok(output) => ExecResult {
                executed: true,
                returncode: output.status.and_then(|status| status.code()),
                stdout: output.stdout_text(),
                stderr: output.stderr_text(),
                timeout: false,
                error: None,
            },
            Err(err) => {
                warn!(err = %format!("{err:#}"), "command could not be run");
                ExecResult {
                    error: Some(format!("{err:#}")),
                    ..ExecResult::default()
                }
            }
        }
    }
}

/// Gate every command in order and run the allowed ones.
///
/// Produces exactly one outcome per command. Denials, timeouts and runtime
/// errors are per-command and never stop the remaining commands.
pub fn execute_commands(
    gate: &CommandGate,
    runner: &dyn CommandRunner,
    commands: &[CommandSpec],
) -> Vec<CommandOutcome> {
    commands
        .iter()
        .map(|spec| {
            let verdict = gate.evaluate(&spec.kind, &spec.code);
            if !verdict.allowed {
                info!(kind = %spec.kind, reason = %verdict.reason, "command denied");
                return CommandOutcome::denied(
                    spec,
                    truncate_text(&spec.code, DENIED_CODE_LIMIT),
                    verdict,
                );
            }
            info!(kind = %spec.kind, "command allowed");
            let exec = runner.run(spec);
            CommandOutcome::allowed(spec, truncate_text(&spec.code, ALLOWED_CODE_LIMIT), verdict, exec)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedRunner;

    fn spec(kind: &str, code: &str) -> CommandSpec {
        CommandSpec {
            kind: kind.to_string(),
            code: code.to_string(),
        }
    }

    fn gate() -> CommandGate {
        CommandGate::new(&["bash".to_string()], &["rm".to_string()]).expect("gate")
    }

    #[test]
    fn one_outcome_per_command_and_denied_never_run() {
        let runner = ScriptedRunner::new(vec![ExecResult {
            executed: true,
            returncode: Some(0),
            stdout: "ok".to_string(),
            ..ExecResult::default()
        }]);
        let commands = vec![
            spec("bash", "rm -rf /"),
            spec("python", "print(1)"),
            spec("bash", "echo ok"),
        ];
        let outcomes = execute_commands(&gate(), &runner, &commands);

        assert_eq!(outcomes.len(), 3);
        assert!(!outcomes[0].allowed);
        assert_eq!(outcomes[0].matched_pattern.as_deref(), Some("rm"));
        assert!(!outcomes[1].allowed);
        assert!(outcomes[2].allowed);
        assert_eq!(outcomes[2].returncode, Some(0));
        assert_eq!(runner.calls(), vec![spec("bash", "echo ok")]);
    }

    #[test]
    fn runtime_error_does_not_stop_later_commands() {
        let runner = ScriptedRunner::new(vec![
            ExecResult {
                error: Some("boom".to_string()),
                ..ExecResult::default()
            },
            ExecResult {
                executed: true,
                returncode: Some(1),
                ..ExecResult::default()
            },
        ]);
        let commands = vec![spec("bash", "first"), spec("bash", "second")];
        let outcomes = execute_commands(&gate(), &runner, &commands);
        assert!(!outcomes[0].executed);
        assert_eq!(outcomes[0].error.as_deref(), Some("boom"));
        assert_eq!(outcomes[1].returncode, Some(1));
    }

    #[test]
    fn missing_interpreter_is_an_error_result() {
        let runner = ShellRunner {
            interpreters: BTreeMap::new(),
            workdir: PathBuf::from("."),
            timeout: Duration::from_secs(1),
            output_limit_bytes: 100,
        };
        let result = runner.run(&spec("bash", "echo hi"));
        assert!(!result.executed);
        assert!(result.error.is_some_and(|e| e.contains("bash")));
    }

    #[cfg(unix)]
    #[test]
    fn shell_runner_captures_output() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = ShellRunner {
            interpreters: BTreeMap::from([(
                "sh".to_string(),
                vec!["sh".to_string(), "-c".to_string()],
            )]),
            workdir: temp.path().to_path_buf(),
            timeout: Duration::from_secs(5),
            output_limit_bytes: 100,
        };
        let result = runner.run(&spec("sh", "echo hello; exit 2"));
        assert!(result.executed);
        assert_eq!(result.returncode, Some(2));
        assert_eq!(result.stdout, "hello\n");
        assert!(!result.timeout);
    }

    #[cfg(unix)]
    #[test]
    fn shell_runner_reports_timeout_without_exit_code() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = ShellRunner {
            interpreters: BTreeMap::from([(
                "sh".to_string(),
                vec!["sh".to_string(), "-c".to_string()],
            )]),
            workdir: temp.path().to_path_buf(),
            timeout: Duration::from_millis(100),
            output_limit_bytes: 100,
        };
        let result = runner.run(&spec("sh", "exec sleep 5"));
        assert!(result.timeout);
        assert_eq!(result.returncode, None);
    }

    #[test]
    fn launch_failure_is_not_executed() {
        let runner = ShellRunner {
            interpreters: BTreeMap::from([(
                "ghost".to_string(),
                vec!["definitely-not-a-real-program-xyz".to_string()],
            )]),
            workdir: PathBuf::from("."),
            timeout: Duration::from_secs(1),
            output_limit_bytes: 100,
        };
        let result = runner.run(&spec("ghost", "anything"));
        assert!(!result.executed);
        assert!(result.error.is_some_and(|e| e.contains("launch")));
    }
}
