//! The chat loop: run steps until the tests pass, a gate is declined, or the
//! failure budget runs out.

use std::ops::ControlFlow;

use anyhow::{Result, bail};
use tracing::{info, warn};

use crate::core::strategy::ModelStrategy;
use crate::core::types::Usage;
use crate::io::chat_store::StepArtifact;
use crate::io::gate::Gate;
use crate::io::git::Committer;
use crate::io::stream::StreamAdapter;
use crate::io::test_runner::TestRunner;
use crate::step::{Orchestrator, StepInput, StepOutcome, StepResult};

/// Reason why `run_loop` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// Tests pass.
    Done,
    /// `fails` consecutive non-passing steps reached `max_fails`.
    FailedBudget { fails: u32, max_fails: u32 },
    /// A gate was declined.
    Cancelled { quiet: bool },
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopOutcome {
    pub session_id: String,
    pub first_step: u32,
    pub steps_executed: u32,
    pub fails: u32,
    /// Whether a commit was made after `Done`.
    pub committed: bool,
    pub stop: LoopStop,
}

/// The first input of a loop: new text, or the prompt of an unfinished step.
pub fn initial_input<A, S, T, G>(
    orchestrator: &Orchestrator<A, S, T, G>,
    text: Option<String>,
) -> Result<(u32, StepInput)> {
    let store = &orchestrator.session.store;
    let step = store.next_step()?;
    if let Some(text) = text {
        return Ok((step, StepInput::Text(text)));
    }
    match store.load_artifact(step, StepArtifact::Prompt)? {
        Some(prompt) => {
            info!(step, "resuming unfinished step");
            Ok((step, StepInput::Packed(prompt)))
        }
        None => bail!("nothing to send: pass a prompt, or a markdown file with a checklist"),
    }
}

/// Run steps from `text` (or the unfinished step) until the loop stops.
///
/// `on_step` sees every finished step. Only `Done` reaches `committer`.
pub fn run_loop<A, S, T, G, C, F>(
    orchestrator: &mut Orchestrator<A, S, T, G>,
    text: Option<String>,
    committer: &mut C,
    mut on_step: F,
) -> Result<LoopOutcome>
where
    A: StreamAdapter,
    S: ModelStrategy,
    T: TestRunner,
    G: Gate,
    C: Committer,
    F: FnMut(&StepOutcome),
{
    let (first_step, mut input) = initial_input(orchestrator, text)?;
    let max_fails = orchestrator.session.config.max_fails;
    let session_id = orchestrator.session.store.id().to_string();
    let mut step = first_step;
    let mut fails = 0u32;
    let mut steps_executed = 0u32;

    loop {
        let outcome = orchestrator.run_step(step, input)?;
        steps_executed += 1;
        on_step(&outcome);

        let next = match &outcome.result {
            StepResult::Pass => ControlFlow::Break(LoopStop::Done),
            StepResult::Cancelled { quiet } => ControlFlow::Break(LoopStop::Cancelled { quiet: *quiet }),
            StepResult::Replied { message } => ControlFlow::Continue(StepInput::Text(message.clone())),
            StepResult::NeedsFix { report } => {
                // Never reset on partial improvement.
                fails += 1;
                if fails >= max_fails {
                    warn!(fails, max_fails, "failure budget exhausted");
                    ControlFlow::Break(LoopStop::FailedBudget { fails, max_fails })
                } else {
                    ControlFlow::Continue(StepInput::Packed(report.clone()))
                }
            }
        };

        let stop = match next {
            ControlFlow::Continue(next_input) => {
                input = next_input;
                step += 1;
                continue;
            }
            ControlFlow::Break(stop) => stop,
        };
        let committed = if stop == LoopStop::Done && orchestrator.session.config.commit_on_done {
            let message = commit_message(&session_id, step, outcome.summary.as_deref());
            committer.commit_all(&message)?
        } else {
            false
        };
        info!(?stop, steps_executed, fails, committed, "loop stopped");
        return Ok(LoopOutcome {
            session_id,
            first_step,
            steps_executed,
            fails,
            committed,
            stop,
        });
    }
}

fn commit_message(session_id: &str, step: u32, summary: Option<&str>) -> String {
    let title = summary
        .and_then(|text| text.lines().map(str::trim).find(|line| !line.is_empty()))
        .map_or_else(|| format!("pairloop: tests pass at step {step}"), str::to_string);
    format!("{title}\n\nSession: {session_id}\nSteps: {step}\n")
}

/// Usage of the whole session, for the closing summary line.
pub fn session_usage<A, S, T, G>(orchestrator: &Orchestrator<A, S, T, G>) -> Result<(Usage, f64)> {
    let store = &orchestrator.session.store;
    Ok((store.usage()?, store.cost()?))
}
