//! Child processes with a deadline and bounded captured output.
//!
//! Used by the test runner, `@bash` blocks and the provider bridge's stderr.

use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// A background reader draining one pipe: kept bytes and discarded count.
pub type ReaderHandle = JoinHandle<Result<(Vec<u8>, usize)>>;

/// How long a child may run and how much of each stream is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessLimits {
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// `None` when the process was killed, by us or by a signal.
    pub fn exit_code(&self) -> Option<i32> {
        if self.timed_out {
            None
        } else {
            self.status.code()
        }
    }

    /// Both streams plus truncation and timeout notices, as stored in `tests.log`.
    pub fn log_text(&self, label: &str) -> String {
        let mut sections = vec![
            format!("=== stdout ===\n{}", self.stdout_text()),
            format!("=== stderr ===\n{}", self.stderr_text()),
        ];
        for (stream, dropped) in [
            ("stdout", self.stdout_truncated),
            ("stderr", self.stderr_truncated),
        ] {
            if dropped > 0 {
                sections.push(format!("[{label} {stream} truncated {dropped} bytes]"));
            }
        }
        if self.timed_out {
            sections.push(format!("[{label} timed out]"));
        }
        let mut text = sections.join("\n");
        text.push('\n');
        text
    }
}

/// Run `cmd` with stdin closed until it exits or `limits.timeout` passes.
///
/// Both pipes are drained on their own threads so a chatty child never
/// blocks; bytes past `limits.output_limit_bytes` are counted and dropped.
#[instrument(skip_all, fields(program = ?cmd.get_program(), timeout_secs = limits.timeout.as_secs()))]
pub fn run_bounded(mut cmd: Command, limits: ProcessLimits) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|err| {
        error!(err = %err, "failed to spawn command");
        anyhow!(err).context("spawn command")
    })?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stdout_reader = spawn_reader(stdout, limits.output_limit_bytes);
    let stderr_reader = spawn_reader(stderr, limits.output_limit_bytes);

    let (status, timed_out) = match child.wait_timeout(limits.timeout).context("wait for command")? {
        Some(status) => (status, false),
        None => {
            warn!("command timed out, killing");
            child.kill().context("kill command")?;
            (child.wait().context("wait command after kill")?, true)
        }
    };

    let (stdout, stdout_truncated) = join_reader(stdout_reader).context("join stdout")?;
    let (stderr, stderr_truncated) = join_reader(stderr_reader).context("join stderr")?;
    if stdout_truncated + stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

/// Drain `reader` on a new thread, keeping at most `limit` bytes.
pub fn spawn_reader<R: Read + Send + 'static>(reader: R, limit: usize) -> ReaderHandle {
    thread::spawn(move || read_limited(reader, limit))
}

pub fn join_reader(handle: ReaderHandle) -> Result<(Vec<u8>, usize)> {
    handle
        .join()
        .map_err(|_| anyhow!("output reader thread panicked"))?
}

fn read_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut kept = Vec::new();
    let mut dropped = 0usize;
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            return Ok((kept, dropped));
        }
        let keep = n.min(limit.saturating_sub(kept.len()));
        kept.extend_from_slice(&chunk[..keep]);
        dropped += n - keep;
    }
}
