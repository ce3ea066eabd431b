//! Loop-level scenarios driven through scripted collaborators.
//!
//! Each test runs `run_loop` against a temp project with a scripted model,
//! scripted test runs and scripted gates, then inspects the persisted step
//! artifacts.

use pairloop::core::strategy::{DEFAULT_BACKOFF_MS, FastestStrategy, Tier, TierPolicy};
use pairloop::core::types::{ModelInfo, ModelRef, Role};
use pairloop::error::{NoSuitableModel, ProviderError};
use pairloop::io::chat_store::{ChatStore, StepArtifact, StepMeta, StepStatus};
use pairloop::io::config::PairloopConfig;
use pairloop::io::gate::{AutoConfirm, GateAnswer};
use pairloop::looping::{LoopStop, run_loop};
use pairloop::test_support::{
    RecordingCommitter, ScriptedAdapter, ScriptedGate, ScriptedResponse, ScriptedTestRunner,
    TestProject, failing_run, passing_run,
};

const FIX_ANSWER: &str = "Here is the fix.

#### [Math](src/math.js)
```js
export const add = (a, b) => a + b
```

#### [](@summary)
```
Fix add
```
";

fn meta(store: &ChatStore, step: u32) -> StepMeta {
    store
        .load_json(step, StepArtifact::Meta)
        .expect("load meta")
        .expect("meta exists")
}

/// Scenario C: tests exit 0 with nothing failing, so the first step is Done,
/// the failure counter stays at zero and the work is committed.
#[test]
fn passing_step_finishes_the_loop() {
    let project = TestProject::new().expect("project");
    project
        .write("src/math.js", "export const add = (a, b) => a - b\n")
        .expect("write");
    let adapter = ScriptedAdapter::new(vec![ScriptedResponse::answer(FIX_ANSWER)]);
    let tests = ScriptedTestRunner::new(vec![passing_run()]);
    let mut orchestrator = project
        .orchestrator(adapter, tests, AutoConfirm)
        .expect("orchestrator");
    let mut committer = RecordingCommitter::default();

    let outcome = run_loop(
        &mut orchestrator,
        Some("Fix add:\n- [](src/math.js)\n".to_string()),
        &mut committer,
        |_| {},
    )
    .expect("loop");

    assert_eq!(outcome.stop, LoopStop::Done);
    assert_eq!(outcome.fails, 0);
    assert_eq!(outcome.steps_executed, 1);
    assert!(outcome.committed);
    assert!(committer.messages[0].starts_with("Fix add\n"));
    assert_eq!(
        project.read("src/math.js").expect("read"),
        "export const add = (a, b) => a + b\n"
    );

    let store = &orchestrator.session.store;
    assert_eq!(meta(store, 1).status, StepStatus::Pass);
    let prompt = store
        .load_artifact(1, StepArtifact::Prompt)
        .expect("load prompt")
        .expect("prompt");
    assert!(prompt.contains("#### [](src/math.js)\n```js\nexport const add = (a, b) => a - b\n```"));

    let roles: Vec<Role> = store
        .load_messages()
        .expect("messages")
        .iter()
        .map(|m| m.role)
        .collect();
    assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
}

/// Scenario D: nine needs-fix steps with `max_fails = 9` stop in
/// FailedBudget at step 9 without a tenth send.
#[test]
fn failure_budget_stops_at_max_fails() {
    let project = TestProject::new().expect("project");
    let responses = (0..10).map(|_| ScriptedResponse::answer(FIX_ANSWER)).collect();
    let runs = (0..10).map(|_| failing_run()).collect();
    let config = PairloopConfig {
        max_fails: 9,
        ..PairloopConfig::default()
    };
    let mut orchestrator = project
        .orchestrator_with(
            config,
            ScriptedAdapter::new(responses),
            ScriptedTestRunner::new(runs),
            AutoConfirm,
        )
        .expect("orchestrator");
    let mut committer = RecordingCommitter::default();

    let outcome = run_loop(
        &mut orchestrator,
        Some("Make the tests pass".to_string()),
        &mut committer,
        |_| {},
    )
    .expect("loop");

    assert_eq!(
        outcome.stop,
        LoopStop::FailedBudget {
            fails: 9,
            max_fails: 9
        }
    );
    assert_eq!(outcome.steps_executed, 9);
    assert_eq!(orchestrator.adapter.requests().len(), 9);
    assert_eq!(orchestrator.tests.calls(), 9);
    assert!(committer.messages.is_empty());

    let store = &orchestrator.session.store;
    assert_eq!(store.completed_steps().expect("steps"), (1..=9).collect::<Vec<_>>());
    assert!(!store.step_paths(10).dir.exists());
    assert_eq!(meta(store, 9).status, StepStatus::NeedsFix);

    let report = store
        .load_artifact(2, StepArtifact::Prompt)
        .expect("load prompt")
        .expect("prompt");
    assert!(report.starts_with("## Test results:\n"));
    assert!(report.contains("### fail tests:\n\n#### src/math.test.js:4:3\n```yaml\n"));
}

/// Scenario E: a rate limit on the first send falls back to the next fast
/// model; exactly one retry happens and the step records the fallback model.
#[test]
fn rate_limit_falls_back_once() {
    let project = TestProject::new().expect("project");
    let adapter = ScriptedAdapter::new(vec![
        ScriptedResponse::rate_limited(),
        ScriptedResponse::answer(FIX_ANSWER),
    ]);
    let mut orchestrator = project
        .orchestrator(adapter, ScriptedTestRunner::new(vec![passing_run()]), AutoConfirm)
        .expect("orchestrator");

    let outcome = run_loop(
        &mut orchestrator,
        Some("Fix add".to_string()),
        &mut RecordingCommitter::default(),
        |_| {},
    )
    .expect("loop");
    assert_eq!(outcome.stop, LoopStop::Done);

    let fallback = ModelRef::new("qwen-3-235b-a22b-instruct-2507", "cerebras");
    assert_eq!(
        orchestrator.adapter.requests(),
        &[
            (1, ModelRef::new("gpt-oss-120b", "cerebras")),
            (1, fallback.clone()),
        ]
    );

    let store = &orchestrator.session.store;
    let model: ModelInfo = store
        .load_json(1, StepArtifact::Model)
        .expect("load model")
        .expect("model");
    assert_eq!(model.model_ref(), fallback);
    let meta = meta(store, 1);
    assert_eq!(meta.model, fallback);
    assert_eq!(meta.attempts, 2);
}

/// A second failure after the fallback is fatal and leaves the step incomplete.
#[test]
fn failed_fallback_is_fatal() {
    let project = TestProject::new().expect("project");
    let adapter = ScriptedAdapter::new(vec![
        ScriptedResponse::rate_limited(),
        ScriptedResponse::Error(ProviderError::Transient("503".to_string())),
    ]);
    let mut orchestrator = project
        .orchestrator(adapter, ScriptedTestRunner::default(), AutoConfirm)
        .expect("orchestrator");

    let err = run_loop(
        &mut orchestrator,
        Some("Fix add".to_string()),
        &mut RecordingCommitter::default(),
        |_| {},
    )
    .expect_err("fatal");

    assert_eq!(
        err.downcast_ref::<ProviderError>(),
        Some(&ProviderError::Transient("503".to_string()))
    );
    assert_eq!(orchestrator.adapter.requests().len(), 2);
    assert!(!orchestrator.session.store.is_step_complete(1));
}

/// A stream that dies after some text is retried on the fallback; only the
/// fallback's answer is recorded.
#[test]
fn interrupted_stream_keeps_only_the_fallback_answer() {
    let project = TestProject::new().expect("project");
    let adapter = ScriptedAdapter::new(vec![
        ScriptedResponse::Interrupted {
            partial: "Here is the fi".to_string(),
            error: ProviderError::Transient("connection reset".to_string()),
        },
        ScriptedResponse::answer(FIX_ANSWER),
    ]);
    let mut orchestrator = project
        .orchestrator(adapter, ScriptedTestRunner::new(vec![passing_run()]), AutoConfirm)
        .expect("orchestrator");

    let outcome = run_loop(
        &mut orchestrator,
        Some("Fix add".to_string()),
        &mut RecordingCommitter::default(),
        |_| {},
    )
    .expect("loop");

    assert_eq!(outcome.stop, LoopStop::Done);
    assert_eq!(orchestrator.adapter.requests().len(), 2);
    let store = &orchestrator.session.store;
    assert_eq!(meta(store, 1).attempts, 2);
    assert_eq!(
        store
            .load_artifact(1, StepArtifact::Answer)
            .expect("load answer")
            .as_deref(),
        Some(FIX_ANSWER)
    );
    let messages = store.messages();
    assert_eq!(messages.last().map(|m| m.content.as_str()), Some(FIX_ANSWER));
}

/// When the strategy can only offer the model that just failed, the step
/// fails without a second request.
#[test]
fn fallback_to_the_same_model_is_fatal() {
    let project = TestProject::new().expect("project");
    let mut orchestrator = project
        .orchestrator(
            ScriptedAdapter::new(vec![
                ScriptedResponse::rate_limited(),
                ScriptedResponse::answer(FIX_ANSWER),
            ]),
            ScriptedTestRunner::default(),
            AutoConfirm,
        )
        .expect("orchestrator");
    orchestrator.strategy = FastestStrategy::new(
        vec![Tier {
            max_tokens: 2_000_000,
            provider: "cerebras".to_string(),
            models: vec!["gpt-oss-120b".to_string()],
            policy: TierPolicy::Single,
        }],
        DEFAULT_BACKOFF_MS,
    );

    let err = run_loop(
        &mut orchestrator,
        Some("Fix add".to_string()),
        &mut RecordingCommitter::default(),
        |_| {},
    )
    .expect_err("fatal");

    assert!(matches!(
        err.downcast_ref::<ProviderError>(),
        Some(ProviderError::RateLimited { .. })
    ));
    assert_eq!(orchestrator.adapter.requests().len(), 1);
    assert!(!orchestrator.session.store.is_step_complete(1));
}

fn with_cerebras_context(context_length: u64) -> PairloopConfig {
    let mut config = PairloopConfig::default();
    for model in config.models.iter_mut().filter(|m| m.provider == "cerebras") {
        model.context_length = context_length;
    }
    config
}

/// A prompt that outgrows the fast models moves to the first tier whose
/// catalog context actually holds it.
#[test]
fn large_prompt_escalates_to_a_model_that_fits() {
    let project = TestProject::new().expect("project");
    let mut orchestrator = project
        .orchestrator_with(
            with_cerebras_context(8_192),
            ScriptedAdapter::new(vec![ScriptedResponse::answer(FIX_ANSWER)]),
            ScriptedTestRunner::new(vec![passing_run()]),
            AutoConfirm,
        )
        .expect("orchestrator");
    let prompt = format!("Fix add.\n{}", "x".repeat(40_000));

    let outcome = run_loop(&mut orchestrator, Some(prompt), &mut RecordingCommitter::default(), |_| {})
        .expect("loop");

    assert_eq!(outcome.stop, LoopStop::Done);
    let escalated = ModelRef::new("Qwen/Qwen3-32B", "huggingface/cerebras");
    assert_eq!(orchestrator.adapter.requests(), &[(1, escalated.clone())]);
    assert!(
        orchestrator
            .session
            .config
            .find_model(&escalated)
            .expect("catalog entry")
            .context_length
            > 8_192
    );
    assert_eq!(meta(&orchestrator.session.store, 1).model, escalated);
    assert!(
        orchestrator
            .console
            .captured()
            .iter()
            .any(|line| line.starts_with("Switching to Qwen/Qwen3-32B"))
    );
}

/// Nothing in the catalog can hold the prompt, so no request is sent.
#[test]
fn prompt_larger_than_every_model_is_fatal() {
    let project = TestProject::new().expect("project");
    let mut config = PairloopConfig::default();
    for model in &mut config.models {
        model.context_length = 8_192;
    }
    let mut orchestrator = project
        .orchestrator_with(
            config,
            ScriptedAdapter::default(),
            ScriptedTestRunner::default(),
            AutoConfirm,
        )
        .expect("orchestrator");

    let err = run_loop(
        &mut orchestrator,
        Some("x".repeat(40_000)),
        &mut RecordingCommitter::default(),
        |_| {},
    )
    .expect_err("fatal");

    assert!(err.downcast_ref::<NoSuitableModel>().is_some());
    assert!(orchestrator.adapter.requests().is_empty());
}

/// Declining the unpack gate cancels cleanly: nothing is written, no tests
/// run, and the step is recorded as cancelled.
#[test]
fn declining_the_unpack_gate_cancels() {
    let project = TestProject::new().expect("project");
    let tests = ScriptedTestRunner::default();
    let gate = ScriptedGate::new(vec![GateAnswer::Yes, GateAnswer::No]);
    let mut orchestrator = project
        .orchestrator(ScriptedAdapter::new(vec![ScriptedResponse::answer(FIX_ANSWER)]), tests, gate)
        .expect("orchestrator");
    orchestrator.auto_confirm = false;

    let outcome = run_loop(
        &mut orchestrator,
        Some("Fix add".to_string()),
        &mut RecordingCommitter::default(),
        |_| {},
    )
    .expect("loop");

    assert_eq!(outcome.stop, LoopStop::Cancelled { quiet: false });
    assert_eq!(outcome.fails, 0);
    assert_eq!(orchestrator.tests.calls(), 0);
    assert!(!project.root().join("src/math.js").exists());
    assert_eq!(meta(&orchestrator.session.store, 1).status, StepStatus::Cancelled);
    assert!(
        orchestrator
            .console
            .captured()
            .iter()
            .any(|line| line.starts_with("• src/math.js"))
    );
}

/// Free text at the unpack gate becomes the next prompt and skips testing.
#[test]
fn reply_at_the_unpack_gate_starts_the_next_step() {
    let project = TestProject::new().expect("project");
    let adapter = ScriptedAdapter::new(vec![
        ScriptedResponse::answer(FIX_ANSWER),
        ScriptedResponse::answer(FIX_ANSWER),
    ]);
    let gate = ScriptedGate::new(vec![
        GateAnswer::Yes,
        GateAnswer::Text("Use a named function".to_string()),
        GateAnswer::Yes,
        GateAnswer::Yes,
    ]);
    let mut orchestrator = project
        .orchestrator(adapter, ScriptedTestRunner::new(vec![passing_run()]), gate)
        .expect("orchestrator");
    orchestrator.auto_confirm = false;

    let outcome = run_loop(
        &mut orchestrator,
        Some("Fix add".to_string()),
        &mut RecordingCommitter::default(),
        |_| {},
    )
    .expect("loop");

    assert_eq!(outcome.stop, LoopStop::Done);
    assert_eq!(outcome.steps_executed, 2);
    assert_eq!(orchestrator.tests.calls(), 1);
    let store = &orchestrator.session.store;
    assert_eq!(meta(store, 1).status, StepStatus::Replied);
    assert_eq!(
        store
            .load_artifact(2, StepArtifact::Prompt)
            .expect("load")
            .as_deref(),
        Some("Use a named function")
    );
}

/// Declining a test gate stops without counting a budget failure.
#[test]
fn declining_a_test_gate_is_not_a_failure() {
    let project = TestProject::new().expect("project");
    let gate = ScriptedGate::new(vec![GateAnswer::Yes, GateAnswer::Yes, GateAnswer::Quiet]);
    let mut orchestrator = project
        .orchestrator(
            ScriptedAdapter::new(vec![ScriptedResponse::answer(FIX_ANSWER)]),
            ScriptedTestRunner::new(vec![failing_run()]),
            gate,
        )
        .expect("orchestrator");
    orchestrator.auto_confirm = false;

    let outcome = run_loop(
        &mut orchestrator,
        Some("Fix add".to_string()),
        &mut RecordingCommitter::default(),
        |_| {},
    )
    .expect("loop");

    assert_eq!(outcome.stop, LoopStop::Cancelled { quiet: true });
    assert_eq!(outcome.fails, 0);
    assert_eq!(
        orchestrator.gate.questions().last().map(String::as_str),
        Some("Continue fixing failing tests?")
    );
}

/// A step cancelled before sending keeps its prompt; the next run without
/// input re-sends it as the same step.
#[test]
fn unfinished_step_is_resumed() {
    let project = TestProject::new().expect("project");
    let mut first = project
        .orchestrator(
            ScriptedAdapter::default(),
            ScriptedTestRunner::default(),
            ScriptedGate::new(vec![GateAnswer::No]),
        )
        .expect("orchestrator");
    first.auto_confirm = false;
    let outcome = run_loop(
        &mut first,
        Some("Fix add".to_string()),
        &mut RecordingCommitter::default(),
        |_| {},
    )
    .expect("first loop");
    assert_eq!(outcome.stop, LoopStop::Cancelled { quiet: false });
    assert!(first.adapter.requests().is_empty());
    drop(first);

    let mut second = project
        .orchestrator(
            ScriptedAdapter::new(vec![ScriptedResponse::answer(FIX_ANSWER)]),
            ScriptedTestRunner::new(vec![passing_run()]),
            AutoConfirm,
        )
        .expect("orchestrator");
    let outcome = run_loop(&mut second, None, &mut RecordingCommitter::default(), |_| {})
        .expect("second loop");

    assert_eq!(outcome.stop, LoopStop::Done);
    assert_eq!(outcome.first_step, 1);
    assert_eq!(second.adapter.requests()[0].0, 1);
    let messages = second.session.store.messages();
    assert_eq!(messages[1].content, "Fix add");
}
