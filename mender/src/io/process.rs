//! Child process execution with a timeout and bounded output capture.

use std::io::{ErrorKind, Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

use crate::error::RepairError;

/// How long to wait for output after killing a timed-out child. A grandchild
/// that inherited the pipes can hold them open past the kill.
const READER_GRACE: Duration = Duration::from_millis(250);

/// Time and output budget for one child process.
#[derive(Debug, Clone, Copy)]
pub struct ProcessLimits {
    pub timeout: Duration,
    /// Bytes kept per stream; the rest is drained and discarded.
    pub output_limit_bytes: usize,
}

/// Captured child process output.
#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Stdout followed by stderr, with truncation notices.
    pub fn combined_text(&self) -> String {
        let mut buf = String::from_utf8_lossy(&self.stdout).into_owned();
        if self.stdout_truncated > 0 {
            buf.push_str(&format!("\n[stdout truncated {} bytes]\n", self.stdout_truncated));
        }
        buf.push_str(&String::from_utf8_lossy(&self.stderr));
        if self.stderr_truncated > 0 {
            buf.push_str(&format!("\n[stderr truncated {} bytes]\n", self.stderr_truncated));
        }
        buf
    }
}

/// Run `argv` (program followed by arguments) with a timeout.
///
/// Output is read concurrently while the child runs so a chatty child cannot
/// deadlock on a full pipe. A timeout kills the child and is reported through
/// `timed_out`, not as an error. A missing executable is reported as
/// [`RepairError::ToolUnavailable`].
#[instrument(
    skip_all,
    fields(
        program = argv.first().map(String::as_str),
        timeout_secs = limits.timeout.as_secs()
    )
)]
pub fn run_command(
    argv: &[String],
    stdin: Option<&[u8]>,
    limits: ProcessLimits,
) -> Result<ProcessOutput> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| anyhow!("command must be non-empty"))?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(RepairError::ToolUnavailable(format!("{program}: {err}")).into());
        }
        Err(err) => return Err(err).with_context(|| format!("spawn {program}")),
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let limit = limits.output_limit_bytes;
    let stdout_rx = spawn_reader(stdout, limit);
    let stderr_rx = spawn_reader(stderr, limit);

    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        // A child that exits without reading its input closes the pipe early.
        if let Err(err) = child_stdin.write_all(input)
            && err.kind() != ErrorKind::BrokenPipe
        {
            return Err(err).context("write stdin");
        }
    }

    let mut timed_out = false;
    let status = match child.wait_timeout(limits.timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(timeout_secs = limits.timeout.as_secs(), "command timed out, killing");
            timed_out = true;
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    let grace = timed_out.then_some(READER_GRACE);
    let (stdout, stdout_truncated) = collect_reader(&stdout_rx, grace, "stdout")?;
    let (stderr, stderr_truncated) = collect_reader(&stderr_rx, grace, "stderr")?;
    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(ProcessOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

type Captured = Result<(Vec<u8>, usize)>;

fn spawn_reader<R: Read + Send + 'static>(reader: R, limit: usize) -> Receiver<Captured> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        // The receiver is gone only if the caller gave up on this stream.
        let _ = tx.send(read_limited(reader, limit));
    });
    rx
}

/// Wait for a reader. With a `grace` bound, a stream still open afterwards is
/// abandoned and reported as empty; its thread ends when the pipe closes.
fn collect_reader(rx: &Receiver<Captured>, grace: Option<Duration>, stream: &str) -> Captured {
    let received = match grace {
        None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        Some(grace) => rx.recv_timeout(grace),
    };
    match received {
        Ok(captured) => captured.with_context(|| format!("read {stream}")),
        Err(RecvTimeoutError::Timeout) => {
            warn!(stream, "pipe held open after kill, dropping its output");
            Ok((Vec::new(), 0))
        }
        Err(RecvTimeoutError::Disconnected) => Err(anyhow!("{stream} reader thread panicked")),
    }
}

fn read_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
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
