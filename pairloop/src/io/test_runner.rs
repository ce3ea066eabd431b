//! Test-suite runner adapter.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{info, instrument, warn};

use crate::io::config::TestConfig;
use crate::io::process::{ProcessLimits, run_bounded};

#[derive(Debug, Clone)]
pub struct TestRequest {
    pub workdir: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

/// Raw result of one test-suite run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRun {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process died from a signal or timed out.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    /// Both streams with notices, as stored in `tests.log`.
    pub log: String,
}

impl TestRun {
    pub fn exited_cleanly(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out
    }
}

pub trait TestRunner {
    fn run(&mut self, request: &TestRequest) -> Result<TestRun>;
}

/// Runs the configured test command (`[test].command`).
#[derive(Debug, Clone)]
pub struct CommandTestRunner {
    command: Vec<String>,
}

impl CommandTestRunner {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }

    pub fn from_config(config: &TestConfig) -> Self {
        Self::new(config.command.clone())
    }
}

impl TestRunner for CommandTestRunner {
    #[instrument(skip_all, fields(command = %self.command.join(" ")))]
    fn run(&mut self, request: &TestRequest) -> Result<TestRun> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("test command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&request.workdir);

        info!("running tests");
        let limits = ProcessLimits {
            timeout: request.timeout,
            output_limit_bytes: request.output_limit_bytes,
        };
        let output = run_bounded(cmd, limits)
            .map_err(|e| e.context(format!("run test command {}", self.command.join(" "))))?;
        if output.timed_out {
            warn!(timeout_secs = request.timeout.as_secs(), "test command timed out");
        }
        Ok(TestRun {
            stdout: output.stdout_text(),
            stderr: output.stderr_text(),
            exit_code: output.exit_code(),
            timed_out: output.timed_out,
            log: output.log_text("tests"),
        })
    }
}
