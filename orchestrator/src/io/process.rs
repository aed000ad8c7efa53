//! Child process execution with a timeout and bounded output capture.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug)]
pub struct ProcessOutput {
    /// Exit status; `None` when the child was killed on timeout.
    pub status: Option<ExitStatus>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl ProcessOutput {
    /// Lossy UTF-8 stdout followed by a truncation notice if bytes were dropped.
    pub fn stdout_text(&self) -> String {
        bounded_text(&self.stdout, self.stdout_truncated, "stdout")
    }

    pub fn stderr_text(&self) -> String {
        bounded_text(&self.stderr, self.stderr_truncated, "stderr")
    }
}

fn bounded_text(bytes: &[u8], truncated: usize, label: &str) -> String {
    let mut text = String::from_utf8_lossy(bytes).into_owned();
    if truncated > 0 {
        text.push_str(&format!("\n[{label} truncated {truncated} bytes]"));
    }
    text
}

/// Failure to start the child at all.
#[derive(Debug, thiserror::Error)]
#[error("launch {program}: {source}")]
pub struct SpawnError {
    pub program: String,
    #[source]
    pub source: std::io::Error,
}

/// Grace given to the output readers once the process group is gone.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

type Captured = (Vec<u8>, usize);

/// Run `cmd`, killing it after `timeout`.
///
/// Both pipes are drained on reader threads while the child runs, so a chatty
/// child cannot deadlock on a full pipe. At most `output_limit_bytes` of each
/// stream are kept; the rest is counted and discarded.
///
/// On unix the child leads its own process group and the whole group is
/// killed, so a grandchild holding the pipes cannot outlive the timeout.
/// Output the readers have not delivered within the budget is dropped.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<ProcessOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let program = cmd.get_program().to_string_lossy().into_owned();
    debug!(%program, "spawning child process");
    let deadline = Instant::now() + timeout;
    let mut child = cmd
        .spawn()
        .map_err(|source| SpawnError { program, source })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let (tx, rx) = mpsc::channel();
    let stdout_tx = tx.clone();
    thread::spawn(move || {
        let _ = stdout_tx.send((Stream::Stdout, read_stream_limited(stdout, output_limit_bytes)));
    });
    thread::spawn(move || {
        let _ = tx.send((Stream::Stderr, read_stream_limited(stderr, output_limit_bytes)));
    });

    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => Some(status),
        None => {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            kill_group(&mut child).context("kill command")?;
            child.wait().context("wait command after kill")?;
            None
        }
    };

    let mut drained = Drained::default();
    let budget = deadline.saturating_duration_since(Instant::now()).max(DRAIN_GRACE);
    drained.receive(&rx, budget)?;
    if !drained.is_complete() {
        // Exited, but something it started still holds a pipe.
        warn!("output still open after the command finished, killing its process group");
        kill_group(&mut child).context("kill leftover processes")?;
        drained.receive(&rx, DRAIN_GRACE)?;
    }
    let (stdout, stdout_truncated) = drained.take(Stream::Stdout);
    let (stderr, stderr_truncated) = drained.take(Stream::Stderr);

    if stdout_truncated > 0 || stderr_truncated > 0 {
        debug!(stdout_truncated, stderr_truncated, "output truncated");
    }

    let timed_out = status.is_none();
    debug!(exit_code = ?status.and_then(|s| s.code()), timed_out, "command finished");
    Ok(ProcessOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

/// Kill the child's process group (unix) or the child alone.
fn kill_group(child: &mut Child) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        if let Ok(pgid) = i32::try_from(child.id()) {
            match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
                Ok(()) => return Ok(()),
                // Group already empty.
                Err(nix::errno::Errno::ESRCH) => return Ok(()),
                Err(err) => debug!(%err, "killpg failed, killing child only"),
            }
        }
    }
    match child.kill() {
        Err(err) if err.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
        other => other,
    }
}

/// Reader results received so far.
#[derive(Default)]
struct Drained {
    stdout: Option<Captured>,
    stderr: Option<Captured>,
}

impl Drained {
    fn is_complete(&self) -> bool {
        self.stdout.is_some() && self.stderr.is_some()
    }

    /// Collect reader results until both arrived or `wait` elapsed.
    fn receive(
        &mut self,
        rx: &mpsc::Receiver<(Stream, Result<Captured>)>,
        wait: Duration,
    ) -> Result<()> {
        let until = Instant::now() + wait;
        while !self.is_complete() {
            let left = until.saturating_duration_since(Instant::now());
            let Ok((stream, captured)) = rx.recv_timeout(left) else {
                break;
            };
            let captured = captured.with_context(|| format!("read {stream:?}"))?;
            match stream {
                Stream::Stdout => self.stdout = Some(captured),
                Stream::Stderr => self.stderr = Some(captured),
            }
        }
        Ok(())
    }

    fn take(&mut self, stream: Stream) -> Captured {
        let slot = match stream {
            Stream::Stdout => &mut self.stdout,
            Stream::Stderr => &mut self.stderr,
        };
        slot.take().unwrap_or_else(|| {
            warn!(?stream, "output reader did not finish, dropping its output");
            (Vec::new(), 0)
        })
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<Captured> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        let keep = n.min(remaining);
        buf.extend_from_slice(&chunk[..keep]);
        truncated += n - keep;
    }

    Ok((buf, truncated))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_exit_code_and_streams() {
        let out = run_with_timeout(sh("echo out; echo err >&2; exit 3"), Duration::from_secs(5), 1000)
            .expect("run");
        assert_eq!(out.status.and_then(|s| s.code()), Some(3));
        assert_eq!(out.stdout_text(), "out\n");
        assert_eq!(out.stderr_text(), "err\n");
        assert!(!out.timed_out);
    }

    #[test]
    fn truncates_with_visible_notice() {
        let out = run_with_timeout(sh("printf 'abcdefghij'"), Duration::from_secs(5), 4)
            .expect("run");
        assert_eq!(out.stdout_truncated, 6);
        assert_eq!(out.stdout_text(), "abcd\n[stdout truncated 6 bytes]");
    }

    #[test]
    fn kills_on_timeout() {
        let out = run_with_timeout(sh("exec sleep 5"), Duration::from_millis(100), 100).expect("run");
        assert!(out.timed_out);
        assert!(out.status.is_none());
    }

    #[test]
    fn timeout_kills_grandchildren_holding_the_pipes() {
        let started = Instant::now();
        let out = run_with_timeout(sh("sleep 6; echo late"), Duration::from_millis(200), 100)
            .expect("run");
        assert!(out.timed_out);
        assert!(started.elapsed() < Duration::from_secs(3), "took {:?}", started.elapsed());
        assert_eq!(out.stdout_text(), "");
    }

    #[test]
    fn background_process_does_not_hold_the_step() {
        let started = Instant::now();
        let out = run_with_timeout(sh("sleep 6 & echo started"), Duration::from_millis(300), 100)
            .expect("run");
        assert_eq!(out.status.and_then(|s| s.code()), Some(0));
        assert!(!out.timed_out);
        assert!(started.elapsed() < Duration::from_secs(3), "took {:?}", started.elapsed());
        assert_eq!(out.stdout_text(), "started\n");
    }

    #[test]
    fn missing_program_is_spawn_error() {
        let err = run_with_timeout(
            Command::new("definitely-not-a-real-program-xyz"),
            Duration::from_secs(1),
            100,
        )
        .unwrap_err();
        assert!(err.downcast_ref::<SpawnError>().is_some());
    }
}
