//! User-facing output.
//!
//! Progress and unpack lines are product output and go to stdout. Tracing is
//! separate (see [`crate::logging`]).

use std::io::{self, Write};

use crate::core::progress::ProgressReport;

/// How progress is rendered. Passed in explicitly, never read from globals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputConfig {
    /// One progress line per response instead of a phase table.
    pub tiny: bool,
    pub debug: bool,
}

#[derive(Debug)]
enum Sink {
    Stdout,
    Memory(Vec<String>),
}

#[derive(Debug)]
pub struct Console {
    config: OutputConfig,
    sink: Sink,
}

impl Console {
    pub fn stdout(config: OutputConfig) -> Self {
        Self {
            config,
            sink: Sink::Stdout,
        }
    }

    /// Keeps every line in memory, see [`Console::captured`].
    pub fn memory(config: OutputConfig) -> Self {
        Self {
            config,
            sink: Sink::Memory(Vec::new()),
        }
    }

    pub fn config(&self) -> OutputConfig {
        self.config
    }

    pub fn line(&mut self, line: impl Into<String>) {
        let line = line.into();
        match &mut self.sink {
            Sink::Stdout => {
                let mut out = io::stdout().lock();
                // A closed stdout must not abort the loop.
                let _ = writeln!(out, "{line}");
            }
            Sink::Memory(lines) => lines.push(line),
        }
    }

    pub fn lines<I, S>(&mut self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for line in lines {
            self.line(line);
        }
    }

    pub fn progress(&mut self, report: &ProgressReport) {
        if self.config.tiny {
            self.line(report.tiny());
        } else {
            self.lines(report.lines());
        }
    }

    /// Lines written to a memory console; empty for stdout.
    pub fn captured(&self) -> &[String] {
        match &self.sink {
            Sink::Stdout => &[],
            Sink::Memory(lines) => lines,
        }
    }
}
