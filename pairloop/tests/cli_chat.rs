//! CLI tests for `pairloop`.
//!
//! Spawns the binary against a temp project and a replay fixture, so no
//! provider is involved.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use pairloop::exit_codes;
use pairloop::io::config::{PairloopConfig, TestConfig, load_config, write_config};
use pairloop::io::paths::PairloopPaths;

const ANSWER: &str = "#### [Greeting](src/hello.txt)
```
hello
```

#### [](@summary)
```
Add greeting
```
";

fn write_project_config(root: &Path, test_script: &str) {
    let config = PairloopConfig {
        commit_on_done: false,
        test: TestConfig {
            command: vec!["sh".to_string(), "-c".to_string(), test_script.to_string()],
            ..TestConfig::default()
        },
        ..PairloopConfig::default()
    };
    write_config(&PairloopPaths::new(root).config_path, &config).expect("write config");
}

fn write_fixture(dir: &Path, step: &str, answer: &str) {
    let step_dir = dir.join("step").join(step);
    fs::create_dir_all(&step_dir).expect("fixture dir");
    fs::write(step_dir.join("answer.md"), answer).expect("answer");
}

fn pairloop(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_pairloop"))
        .arg("--root")
        .arg(root)
        .args(args)
        .output()
        .expect("run pairloop")
}

#[test]
fn replayed_chat_applies_the_answer_and_passes() {
    let project = tempfile::tempdir().expect("project");
    let fixture = tempfile::tempdir().expect("fixture");
    write_project_config(project.path(), "echo 'ok 1 - greets'; echo '# pass 1'; echo '# fail 0'");
    write_fixture(fixture.path(), "001", ANSWER);

    let output = pairloop(
        project.path(),
        &[
            "--yes",
            "--replay",
            fixture.path().to_str().expect("utf-8 path"),
            "chat",
            "Add a greeting file",
        ],
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(output.status.code(), Some(exit_codes::OK), "stdout: {stdout}");
    assert!(stdout.contains("Done: tests pass"), "stdout: {stdout}");
    assert_eq!(
        fs::read_to_string(project.path().join("src/hello.txt")).expect("written file"),
        "hello\n"
    );
}

/// The suite keeps failing and the replay has an answer for every step, so
/// the loop stops on the failure budget.
#[test]
fn replayed_chat_exits_stuck_when_tests_keep_failing() {
    let project = tempfile::tempdir().expect("project");
    let fixture = tempfile::tempdir().expect("fixture");
    write_project_config(project.path(), "echo 'not ok 1 - greets'; echo '# fail 1'; exit 1");
    let paths = PairloopPaths::new(project.path());
    let mut config = load_config(&paths.config_path).expect("config");
    config.max_fails = 2;
    write_config(&paths.config_path, &config).expect("rewrite config");
    write_fixture(fixture.path(), "001", ANSWER);
    write_fixture(fixture.path(), "002", ANSWER);

    let output = pairloop(
        project.path(),
        &[
            "--yes",
            "--replay",
            fixture.path().to_str().expect("utf-8 path"),
            "chat",
            "Add a greeting file",
        ],
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(output.status.code(), Some(exit_codes::STUCK), "stdout: {stdout}");
    assert!(stdout.contains("Stuck: 2 of 2"), "stdout: {stdout}");
}

#[test]
fn chat_without_provider_or_replay_is_fatal() {
    let project = tempfile::tempdir().expect("project");
    write_project_config(project.path(), "true");

    let output = pairloop(project.path(), &["--yes", "chat", "hello"]);

    assert_eq!(output.status.code(), Some(exit_codes::FATAL));
    assert!(String::from_utf8_lossy(&output.stderr).contains("no provider configured"));
}

#[test]
fn init_writes_default_config_once() {
    let project = tempfile::tempdir().expect("project");
    let paths = PairloopPaths::new(project.path());

    let first = pairloop(project.path(), &["init"]);
    assert_eq!(first.status.code(), Some(exit_codes::OK));
    assert_eq!(
        load_config(&paths.config_path).expect("config"),
        PairloopConfig::default()
    );

    let second = pairloop(project.path(), &["init"]);
    assert_eq!(second.status.code(), Some(exit_codes::OK));
    assert!(String::from_utf8_lossy(&second.stdout).contains("already exists"));
}

#[test]
fn models_filters_the_catalog() {
    let project = tempfile::tempdir().expect("project");

    let output = pairloop(project.path(), &["models", "grok"]);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(stdout.contains("grok-4-fast"));
    assert!(!stdout.contains("gpt-oss-120b"));
}
