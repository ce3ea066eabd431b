//! A single chat step: prepare the prompt, send it, unpack the answer and run
//! the tests.
//!
//! Artifacts land in `.pairloop/chat/<id>/step/NNN/` as each phase finishes;
//! `meta.json` is written last. A step cancelled before its prompt was sent
//! stays incomplete so the next invocation can re-send it.

use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::console::Console;
use crate::core::progress::{account, format_count};
use crate::core::strategy::{FastestStrategy, ModelStrategy, RateLimitMemory, SelectionInput};
use crate::core::test_output::{TestKind, TestRunSummary, parse_test_output};
use crate::core::tokens::{estimate_messages, estimate_tokens, estimate_usage};
use crate::core::types::{Message, ModelRef, Usage};
use crate::error::NoSuitableModel;
use crate::io::chat_store::{StepArtifact, StepMeta, StepStatus};
use crate::io::gate::{Gate, GateAnswer};
use crate::io::pack::{fence_for, pack};
use crate::io::stream::{StreamAdapter, StreamOutcome, StreamRequest, collect_stream};
use crate::io::system_prompt::render_report;
use crate::io::test_runner::{TestRequest, TestRun, TestRunner};
use crate::io::unpack::{ParsedAnswer, UnpackOptions, parse_answer, unpack};
use crate::session::Session;

/// Lines of `tests.log` quoted when the test command failed without results.
const LOG_TAIL_LINES: usize = 40;

/// Test gates, asked in order for every non-zero group.
const TEST_GATES: [(&str, &[TestKind]); 3] = [
    (
        "Continue fixing failing tests?",
        &[TestKind::Fail, TestKind::Cancelled, TestKind::TypeError],
    ),
    ("Continue with todo tests?", &[TestKind::Todo]),
    ("Continue with skipped tests?", &[TestKind::Skip]),
];

/// Text that starts a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepInput {
    /// User text or a checklist; expanded by the packer.
    Text(String),
    /// Ready to send as is (a test report, or a resumed `prompt.md`).
    Packed(String),
}

/// How a step ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepResult {
    Pass,
    /// Tests failed; `report` is the next prompt.
    NeedsFix { report: String },
    /// The user answered the unpack gate with a message for the model.
    Replied { message: String },
    /// A gate was declined. `quiet` for `.`.
    Cancelled { quiet: bool },
}

impl StepResult {
    fn status(&self) -> StepStatus {
        match self {
            Self::Pass => StepStatus::Pass,
            Self::NeedsFix { .. } => StepStatus::NeedsFix,
            Self::Replied { .. } => StepStatus::Replied,
            Self::Cancelled { .. } => StepStatus::Cancelled,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub step: u32,
    /// Model that answered, or would have.
    pub model: ModelRef,
    /// Send attempts; 2 when a fallback model answered.
    pub attempts: u32,
    pub result: StepResult,
    pub tests: Option<TestRunSummary>,
    /// Text of the answer's `@summary` block.
    pub summary: Option<String>,
}

/// The collaborators of a chat loop.
pub struct Orchestrator<A, S, T, G> {
    pub session: Session,
    pub adapter: A,
    pub strategy: S,
    pub tests: T,
    pub gate: G,
    pub console: Console,
    /// Skip every gate (`--yes`).
    pub auto_confirm: bool,
    /// Model for the next request. Updated on escalation and fallback.
    pub model: ModelRef,
    pub memory: RateLimitMemory,
}

impl<A, T, G> Orchestrator<A, FastestStrategy, T, G> {
    /// Default strategy, stdout console, the configured default model.
    pub fn new(session: Session, adapter: A, tests: T, gate: G, console: Console) -> Self {
        let model = session.config.default_model_ref();
        Self {
            session,
            adapter,
            strategy: FastestStrategy::default(),
            tests,
            gate,
            console,
            auto_confirm: false,
            model,
            memory: RateLimitMemory::default(),
        }
    }
}

enum Gated<T> {
    Go(T),
    Stop(StepResult),
}

struct Sent {
    model: ModelRef,
    attempts: u32,
    outcome: StreamOutcome,
    usage: Usage,
}

impl<A, S, T, G> Orchestrator<A, S, T, G>
where
    A: StreamAdapter,
    S: ModelStrategy,
    T: TestRunner,
    G: Gate,
{
    /// Run `step` from prompt to test verdict.
    #[instrument(skip_all, fields(step = step, model = %self.model))]
    pub fn run_step(&mut self, step: u32, input: StepInput) -> Result<StepOutcome> {
        let started_at = Utc::now().to_rfc3339();
        let prompt = match self.prepare(step, input)? {
            Gated::Go(prompt) => prompt,
            Gated::Stop(result) => {
                info!(step, "cancelled before sending");
                return Ok(StepOutcome {
                    step,
                    model: self.model.clone(),
                    attempts: 0,
                    result,
                    tests: None,
                    summary: None,
                });
            }
        };

        let sent = self.send(step, &prompt)?;
        self.record_response(step, &prompt, &sent)?;

        let parsed = parse_answer(&sent.outcome.answer);
        let summary = parsed
            .commands()
            .find(|block| block.path == "@summary")
            .map(|block| block.content.trim().to_string())
            .filter(|text| !text.is_empty());

        let (result, tests) = match self.apply(&parsed)? {
            Gated::Stop(result) => (result, None),
            Gated::Go(()) => {
                let (result, tests) = self.test(step)?;
                (result, Some(tests))
            }
        };

        self.session.store.complete_step(&StepMeta {
            step,
            model: sent.model.clone(),
            status: result.status(),
            attempts: sent.attempts,
            started_at,
            finished_at: Utc::now().to_rfc3339(),
        })?;
        info!(step, status = ?result.status(), "step finished");
        Ok(StepOutcome {
            step,
            model: sent.model,
            attempts: sent.attempts,
            result,
            tests,
            summary,
        })
    }

    /// Pack the input, persist `prompt.md` and make sure the model can hold it.
    fn prepare(&mut self, step: u32, input: StepInput) -> Result<Gated<String>> {
        let store = &self.session.store;
        store.reset_step(step)?;
        let prompt = match input {
            StepInput::Packed(text) => text,
            StepInput::Text(text) => {
                let packed = pack(&text, &self.session.paths.root, &self.session.config.pack.ignore)
                    .context("pack prompt")?;
                for line in &packed.errors {
                    warn!(step, item = %line, "checklist item not packed");
                    self.console.line(format!("! Could not read: {line}"));
                }
                debug!(step, injected = packed.injected.len(), "packed prompt");
                packed.text
            }
        };
        store.save_artifact(step, StepArtifact::Prompt, &prompt)?;

        let tokens = estimate_messages(store.messages()) + estimate_tokens(&prompt);
        let needed = tokens + self.session.config.context_margin_tokens;
        let context_length = self.session.config.find_model(&self.model)?.context_length;
        if needed > context_length {
            let larger = self.escalate(needed)?;
            info!(from = %self.model, to = %larger, tokens = needed, "escalating to a larger context");
            self.console.line(format!(
                "Switching to {larger} for ~{} tokens",
                format_count(needed)
            ));
            self.model = larger;
        }

        if !self.auto_confirm {
            let question = format!(
                "Send step {step} to {} (~{} tokens)?",
                self.model,
                format_count(tokens)
            );
            match self.gate.ask(&question)? {
                GateAnswer::No => return Ok(Gated::Stop(StepResult::Cancelled { quiet: false })),
                GateAnswer::Quiet => return Ok(Gated::Stop(StepResult::Cancelled { quiet: true })),
                GateAnswer::Yes | GateAnswer::Text(_) => {}
            }
        }
        Ok(Gated::Go(prompt))
    }

    /// A model whose catalog context holds `needed` tokens.
    ///
    /// A pick that is still too small is retried with a doubled token count
    /// until the strategy reaches a tier that fits or runs out of tiers.
    fn escalate(&mut self, needed: u64) -> Result<ModelRef> {
        let mut tokens = needed;
        for _ in 0..u64::BITS {
            let Ok(candidate) = self.strategy.select(
                &SelectionInput {
                    current: &self.model,
                    tokens,
                    error: None,
                    now_ms: now_ms(),
                },
                &mut self.memory,
            ) else {
                break;
            };
            let context_length = self.session.config.find_model(&candidate)?.context_length;
            if context_length >= needed {
                return Ok(candidate);
            }
            debug!(model = %candidate, context_length, needed, "candidate context too small");
            tokens = tokens.saturating_mul(2);
        }
        Err(NoSuitableModel { tokens: needed }.into())
    }

    /// Stream the answer; on failure retry once with the strategy's fallback.
    fn send(&mut self, step: u32, prompt: &str) -> Result<Sent> {
        let mut messages = self.session.store.messages().to_vec();
        messages.push(Message::user(prompt));
        let tokens = estimate_messages(&messages);

        let mut attempts = 0;
        loop {
            attempts += 1;
            let model = self.model.clone();
            let started = Instant::now();
            let request = StreamRequest {
                step,
                model: &model,
                messages: &messages,
            };
            let err = match self
                .adapter
                .stream(&request)
                .and_then(|stream| collect_stream(stream, started))
            {
                Ok(outcome) => {
                    let usage = outcome.usage.unwrap_or_else(|| {
                        estimate_usage(&messages, &outcome.reasoning, &outcome.answer)
                    });
                    debug!(step, %model, attempts, "response received");
                    return Ok(Sent {
                        model,
                        attempts,
                        outcome,
                        usage,
                    });
                }
                Err(err) => err,
            };

            warn!(step, %model, class = ?err.class(), err = %err, "send failed");
            self.console.line(format!("! {model}: {err}"));
            if attempts > 1 {
                return Err(anyhow::Error::new(err))
                    .with_context(|| format!("step {step}: {model} failed after fallback"));
            }
            let fallback = self
                .strategy
                .select(
                    &SelectionInput {
                        current: &model,
                        tokens,
                        error: Some(&err),
                        now_ms: now_ms(),
                    },
                    &mut self.memory,
                )
                .map_err(anyhow::Error::new)
                .with_context(|| format!("step {step}: no fallback after {err}"))?;
            if fallback == model {
                warn!(step, %model, "strategy offered no other model");
                return Err(anyhow::Error::new(err))
                    .with_context(|| format!("step {step}: no fallback for {model}"));
            }
            self.session.config.find_model(&fallback)?;
            info!(step, from = %model, to = %fallback, "retrying with fallback model");
            self.console.line(format!("Retrying with {fallback}"));
            self.model = fallback;
        }
    }

    /// Persist the response and append the exchange to the message log.
    fn record_response(&mut self, step: u32, prompt: &str, sent: &Sent) -> Result<()> {
        let info = self.session.config.find_model(&sent.model)?.clone();
        let store = &mut self.session.store;
        let previous_cost = store.cost()?;

        store.save_json(step, StepArtifact::Model, &info)?;
        store.save_artifact(step, StepArtifact::Answer, &sent.outcome.answer)?;
        if !sent.outcome.reasoning.is_empty() {
            store.save_artifact(step, StepArtifact::Reason, &sent.outcome.reasoning)?;
        }
        store.save_json(step, StepArtifact::Usage, &sent.usage)?;
        let mut chunks = String::new();
        for chunk in &sent.outcome.chunks {
            chunks.push_str(&serde_json::to_string(chunk).context("serialize chunk")?);
            chunks.push('\n');
        }
        store.save_artifact(step, StepArtifact::Chunks, &chunks)?;

        store.add(Message::user(prompt))?;
        store.add(Message::assistant(&sent.outcome.answer))?;
        store.save_messages()?;

        let report = account(
            step,
            &sent.usage,
            &sent.outcome.timeline,
            &info.pricing,
            previous_cost,
        );
        self.console.progress(&report);
        Ok(())
    }

    /// Write the answer's files and run its commands, after a dry run unless
    /// auto-confirm is set.
    fn apply(&mut self, parsed: &ParsedAnswer) -> Result<Gated<()>> {
        let config = &self.session.config;
        let options = UnpackOptions {
            root: &self.session.paths.root,
            dry_run: true,
            ignore: &config.pack.ignore,
            bash_timeout: config.test.timeout(),
        };
        if !self.auto_confirm {
            self.console.lines(unpack(parsed, options));
            match self.gate.ask("Apply these changes?")? {
                GateAnswer::Yes => {}
                GateAnswer::No => return Ok(Gated::Stop(StepResult::Cancelled { quiet: false })),
                GateAnswer::Quiet => return Ok(Gated::Stop(StepResult::Cancelled { quiet: true })),
                GateAnswer::Text(message) => {
                    return Ok(Gated::Stop(StepResult::Replied { message }));
                }
            }
        }
        self.console.lines(unpack(
            parsed,
            UnpackOptions {
                dry_run: false,
                ..options
            },
        ));
        Ok(Gated::Go(()))
    }

    /// Run the suite and turn the result into a verdict.
    fn test(&mut self, step: u32) -> Result<(StepResult, TestRunSummary)> {
        let config = &self.session.config;
        let root = &self.session.paths.root;
        let request = TestRequest {
            workdir: root.clone(),
            timeout: config.test.timeout(),
            output_limit_bytes: config.test.output_limit_bytes,
        };
        let run = self.tests.run(&request).context("run tests")?;
        let store = &self.session.store;
        store.save_artifact(step, StepArtifact::TestLog, &run.log)?;
        let summary = parse_test_output(&run.stdout, &run.stderr, root);
        store.save_json(step, StepArtifact::Tests, &summary)?;

        for inconsistency in summary.inconsistencies() {
            warn!(step, %inconsistency, "marker counts disagree with parsed records");
        }
        let counts = summary
            .counts()
            .lines()
            .into_iter()
            .map(|(key, value)| format!("{key} {value}"))
            .collect::<Vec<_>>()
            .join(", ");
        self.console.line(format!("Tests: {counts}"));

        if run.exited_cleanly() && summary.is_clean() {
            return Ok((StepResult::Pass, summary));
        }

        let mut notes = Vec::new();
        if !self.auto_confirm {
            for (question, kinds) in TEST_GATES {
                let count: u64 = kinds.iter().map(|kind| summary.count(*kind)).sum();
                if count == 0 {
                    continue;
                }
                for kind in kinds {
                    for record in summary.records_of(*kind) {
                        self.console.line(format!(
                            "  {} {} {}",
                            kind.as_str(),
                            record.location_label(),
                            record.description
                        ));
                    }
                }
                match self.gate.ask(question)? {
                    GateAnswer::Yes => {}
                    GateAnswer::Text(note) => notes.push(note),
                    GateAnswer::No => {
                        return Ok((StepResult::Cancelled { quiet: false }, summary));
                    }
                    GateAnswer::Quiet => {
                        return Ok((StepResult::Cancelled { quiet: true }, summary));
                    }
                }
            }
        }
        if summary.is_clean() {
            notes.push(failed_run_note(&run));
        }
        let note = notes.join("\n\n");
        let report = render_report(&summary, Some(&note))?;
        Ok((StepResult::NeedsFix { report }, summary))
    }
}

/// Explanation for a run that failed without failing any parsed test.
fn failed_run_note(run: &TestRun) -> String {
    let status = if run.timed_out {
        "timed out".to_string()
    } else {
        match run.exit_code {
            Some(code) => format!("exited with code {code}"),
            None => "was killed".to_string(),
        }
    };
    let lines: Vec<&str> = run.log.lines().collect();
    let tail = lines[lines.len().saturating_sub(LOG_TAIL_LINES)..].join("\n");
    let fence = fence_for(&tail);
    format!("The test command {status}. Last lines of its output:\n\n{fence}\n{tail}\n{fence}")
}

fn now_ms() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}
