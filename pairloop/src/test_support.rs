//! Scripted collaborators and a temp project fixture for loop tests.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::console::{Console, OutputConfig};
use crate::core::strategy::FastestStrategy;
use crate::core::types::{ModelRef, Usage};
use crate::error::ProviderError;
use crate::io::config::PairloopConfig;
use crate::io::gate::{Gate, GateAnswer};
use crate::io::git::Committer;
use crate::io::paths::PairloopPaths;
use crate::io::stream::{EventStream, StreamAdapter, StreamEvent, StreamRequest};
use crate::io::test_runner::{TestRequest, TestRun, TestRunner};
use crate::session::Session;
use crate::step::Orchestrator;

/// One scripted reply of a [`ScriptedAdapter`].
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    Answer {
        reasoning: String,
        answer: String,
        usage: Option<Usage>,
    },
    Error(ProviderError),
    /// Streams `partial` text, then fails with `error`.
    Interrupted {
        partial: String,
        error: ProviderError,
    },
}

impl ScriptedResponse {
    pub fn answer(text: impl Into<String>) -> Self {
        Self::Answer {
            reasoning: String::new(),
            answer: text.into(),
            usage: None,
        }
    }

    pub fn rate_limited() -> Self {
        Self::Error(ProviderError::RateLimited {
            message: "429 Too Many Requests".to_string(),
            retry_at_ms: None,
        })
    }
}

/// Pops one response per request and records the requested models.
#[derive(Debug, Default)]
pub struct ScriptedAdapter {
    responses: VecDeque<ScriptedResponse>,
    requests: Vec<(u32, ModelRef)>,
}

impl ScriptedAdapter {
    pub fn new(responses: Vec<ScriptedResponse>) -> Self {
        Self {
            responses: responses.into(),
            requests: Vec::new(),
        }
    }

    /// `(step, model)` of every request, in order.
    pub fn requests(&self) -> &[(u32, ModelRef)] {
        &self.requests
    }
}

impl StreamAdapter for ScriptedAdapter {
    fn stream(&mut self, request: &StreamRequest<'_>) -> Result<EventStream, ProviderError> {
        self.requests.push((request.step, request.model.clone()));
        let response = self
            .responses
            .pop_front()
            .ok_or_else(|| ProviderError::Fatal("scripted adapter has no responses left".into()))?;
        match response {
            ScriptedResponse::Error(err) => Err(err),
            ScriptedResponse::Interrupted { partial, error } => {
                let events = vec![Ok(StreamEvent::Text(partial)), Err(error)];
                Ok(Box::new(events.into_iter()))
            }
            ScriptedResponse::Answer {
                reasoning,
                answer,
                usage,
            } => {
                let mut events = Vec::new();
                if !reasoning.is_empty() {
                    events.push(Ok(StreamEvent::Reasoning(reasoning)));
                }
                events.push(Ok(StreamEvent::Text(answer)));
                if let Some(usage) = usage {
                    events.push(Ok(StreamEvent::Usage(usage)));
                }
                Ok(Box::new(events.into_iter()))
            }
        }
    }
}

/// Returns queued test runs in order.
#[derive(Debug, Default)]
pub struct ScriptedTestRunner {
    runs: VecDeque<TestRun>,
    calls: usize,
}

impl ScriptedTestRunner {
    pub fn new(runs: Vec<TestRun>) -> Self {
        Self {
            runs: runs.into(),
            calls: 0,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl TestRunner for ScriptedTestRunner {
    fn run(&mut self, _request: &TestRequest) -> Result<TestRun> {
        self.calls += 1;
        self.runs
            .pop_front()
            .ok_or_else(|| anyhow!("scripted test runner has no runs left"))
    }
}

/// A run with the given output and exit code.
pub fn test_run(stdout: &str, exit_code: i32) -> TestRun {
    TestRun {
        stdout: stdout.to_string(),
        stderr: String::new(),
        exit_code: Some(exit_code),
        timed_out: false,
        log: stdout.to_string(),
    }
}

/// Node test runner output with every test passing.
pub fn passing_run() -> TestRun {
    test_run("ok 1 - adds numbers\n# tests 1\n# pass 1\n# fail 0\n", 0)
}

/// Node test runner output with one failing test.
pub fn failing_run() -> TestRun {
    test_run(
        "not ok 1 - adds numbers\n  ---\n  location: 'src/math.test.js:4:3'\n  error: 'expected 3, got 4'\n  ...\n# tests 1\n# pass 0\n# fail 1\n",
        1,
    )
}

/// Answers gates from a queue and records every question.
#[derive(Debug, Default)]
pub struct ScriptedGate {
    answers: VecDeque<GateAnswer>,
    questions: Vec<String>,
}

impl ScriptedGate {
    pub fn new(answers: Vec<GateAnswer>) -> Self {
        Self {
            answers: answers.into(),
            questions: Vec::new(),
        }
    }

    pub fn questions(&self) -> &[String] {
        &self.questions
    }
}

impl Gate for ScriptedGate {
    fn ask(&mut self, question: &str) -> Result<GateAnswer> {
        self.questions.push(question.to_string());
        self.answers
            .pop_front()
            .ok_or_else(|| anyhow!("unexpected gate: {question}"))
    }
}

/// Records commit messages instead of calling git.
#[derive(Debug, Default)]
pub struct RecordingCommitter {
    pub messages: Vec<String>,
}

impl Committer for RecordingCommitter {
    fn commit_all(&mut self, message: &str) -> Result<bool> {
        self.messages.push(message.to_string());
        Ok(true)
    }
}

/// A temporary project root.
#[derive(Debug)]
pub struct TestProject {
    dir: TempDir,
}

impl TestProject {
    pub fn new() -> Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir().context("create temp project")?,
        })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn paths(&self) -> PairloopPaths {
        PairloopPaths::new(self.root())
    }

    pub fn write(&self, rel: &str, contents: &str) -> Result<PathBuf> {
        let path = self.root().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    pub fn read(&self, rel: &str) -> Result<String> {
        let path = self.root().join(rel);
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
    }

    pub fn session(&self, config: PairloopConfig) -> Result<Session> {
        Session::open_with(self.paths(), config, false)
    }

    /// Orchestrator with default config, a memory console and auto-confirm on.
    pub fn orchestrator<A, T, G>(
        &self,
        adapter: A,
        tests: T,
        gate: G,
    ) -> Result<Orchestrator<A, FastestStrategy, T, G>> {
        self.orchestrator_with(PairloopConfig::default(), adapter, tests, gate)
    }

    pub fn orchestrator_with<A, T, G>(
        &self,
        config: PairloopConfig,
        adapter: A,
        tests: T,
        gate: G,
    ) -> Result<Orchestrator<A, FastestStrategy, T, G>> {
        let session = self.session(config)?;
        let console = Console::memory(OutputConfig::default());
        let mut orchestrator = Orchestrator::new(session, adapter, tests, gate, console);
        orchestrator.auto_confirm = true;
        Ok(orchestrator)
    }
}
