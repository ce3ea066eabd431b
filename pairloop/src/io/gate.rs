//! Synchronous confirmation gates.

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};

/// What the user answered at a gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateAnswer {
    Yes,
    No,
    /// `.`: stop without further output.
    Quiet,
    /// Anything else: a message for the model.
    Text(String),
}

impl GateAnswer {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "" | "y" | "yes" => Self::Yes,
            "n" | "no" => Self::No,
            "." => Self::Quiet,
            _ => Self::Text(trimmed.to_string()),
        }
    }

    /// `No` and `Quiet` end the loop.
    pub fn is_cancel(&self) -> bool {
        matches!(self, Self::No | Self::Quiet)
    }
}

pub trait Gate {
    fn ask(&mut self, question: &str) -> Result<GateAnswer>;
}

/// Always answers yes (`--yes`).
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoConfirm;

impl Gate for AutoConfirm {
    fn ask(&mut self, _question: &str) -> Result<GateAnswer> {
        Ok(GateAnswer::Yes)
    }
}

/// Prompts on `output` and reads one line from `input`. End of input is `No`.
#[derive(Debug)]
pub struct LineGate<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> LineGate<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl LineGate<io::StdinLock<'static>, io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> Gate for LineGate<R, W> {
    fn ask(&mut self, question: &str) -> Result<GateAnswer> {
        write!(self.output, "{question} [Y/n/./message] ").context("write prompt")?;
        self.output.flush().context("flush prompt")?;
        let mut line = String::new();
        let read = self.input.read_line(&mut line).context("read answer")?;
        if read == 0 {
            return Ok(GateAnswer::No);
        }
        Ok(GateAnswer::parse(&line))
    }
}
