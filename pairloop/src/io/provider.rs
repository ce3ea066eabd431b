//! Live responses through an external streaming bridge.
//!
//! The bridge is any program that reads `{model, provider, messages}` as JSON
//! on stdin and prints one JSON event per line on stdout:
//!
//! ```text
//! {"type":"reasoning","text":"..."}
//! {"type":"text","text":"..."}
//! {"type":"usage","input_tokens":1,"reasoning_tokens":0,"output_tokens":2}
//! {"type":"error","status":429,"message":"...","retry_at_ms":1700000000000}
//! ```
//!
//! Error classification happens here; the loop only sees [`ProviderError`].

use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::core::types::Message;
use crate::error::ProviderError;
use crate::io::process::{ReaderHandle, join_reader, spawn_reader};
use crate::io::stream::{EventStream, StreamAdapter, StreamEvent, StreamRequest};

const STDERR_LIMIT_BYTES: usize = 64 * 1024;

#[derive(Serialize)]
struct BridgeRequest<'a> {
    model: &'a str,
    provider: &'a str,
    messages: &'a [Message],
}

#[derive(Deserialize)]
struct BridgeError {
    status: Option<u16>,
    #[serde(default)]
    message: String,
    retry_at_ms: Option<u64>,
}

/// Streams responses from the configured bridge command.
#[derive(Debug, Clone)]
pub struct CommandStreamAdapter {
    command: Vec<String>,
    workdir: PathBuf,
    timeout: Duration,
}

impl CommandStreamAdapter {
    pub fn new(command: Vec<String>, workdir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            command,
            workdir: workdir.into(),
            timeout,
        }
    }
}

impl StreamAdapter for CommandStreamAdapter {
    #[instrument(skip_all, fields(step = request.step, model = %request.model))]
    fn stream(&mut self, request: &StreamRequest<'_>) -> Result<EventStream, ProviderError> {
        let Some((program, args)) = self.command.split_first() else {
            return Err(ProviderError::Fatal(
                "no provider command configured".to_string(),
            ));
        };
        let payload = serde_json::to_vec(&BridgeRequest {
            model: &request.model.id,
            provider: &request.model.provider,
            messages: request.messages,
        })
        .map_err(|e| ProviderError::Fatal(format!("serialize bridge request: {e}")))?;

        let mut child = Command::new(program)
            .args(args)
            .current_dir(&self.workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ProviderError::Fatal(format!("spawn {program}: {e}")))?;
        debug!(program = %program, "provider bridge started");

        let write_result = match child.stdin.take() {
            Some(mut stdin) => stdin.write_all(&payload),
            None => Ok(()),
        };
        if let Err(err) = write_result {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ProviderError::Transient(format!("write bridge request: {err}")));
        }

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ProviderError::Fatal("bridge pipes were not captured".to_string()));
        };

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            for line in BufReader::new(stdout).lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
        let stderr_handle = spawn_reader(stderr, STDERR_LIMIT_BYTES);

        Ok(Box::new(BridgeEvents {
            child,
            lines: rx,
            stderr: Some(stderr_handle),
            deadline: Instant::now() + self.timeout,
            timeout: self.timeout,
            done: false,
        }))
    }
}

/// Incremental reader over a running bridge.
struct BridgeEvents {
    child: Child,
    lines: Receiver<String>,
    stderr: Option<ReaderHandle>,
    deadline: Instant,
    timeout: Duration,
    done: bool,
}

impl BridgeEvents {
    fn stop(&mut self) {
        self.done = true;
        let _ = self.child.kill();
        let _ = self.child.wait();
    }

    fn stderr_text(&mut self) -> String {
        self.stderr
            .take()
            .and_then(|handle| join_reader(handle).ok())
            .map(|(bytes, _)| String::from_utf8_lossy(&bytes).trim().to_string())
            .unwrap_or_default()
    }

    fn finish(&mut self) -> Option<Result<StreamEvent, ProviderError>> {
        self.done = true;
        let status = match self.child.wait() {
            Ok(status) => status,
            Err(err) => return Some(Err(ProviderError::Transient(format!("wait bridge: {err}")))),
        };
        if status.success() {
            debug!("provider bridge finished");
            return None;
        }
        let stderr = self.stderr_text();
        warn!(exit_code = ?status.code(), "provider bridge failed");
        Some(Err(ProviderError::Transient(format!(
            "bridge exited with {:?}: {stderr}",
            status.code()
        ))))
    }
}

impl Iterator for BridgeEvents {
    type Item = Result<StreamEvent, ProviderError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let remaining = self.deadline.saturating_duration_since(Instant::now());
            match self.lines.recv_timeout(remaining) {
                Ok(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    return Some(self.decode(&line));
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.stop();
                    warn!(timeout_secs = self.timeout.as_secs(), "provider bridge timed out");
                    return Some(Err(ProviderError::Transient(format!(
                        "provider bridge timed out after {:?}",
                        self.timeout
                    ))));
                }
                Err(RecvTimeoutError::Disconnected) => return self.finish(),
            }
        }
        None
    }
}

impl BridgeEvents {
    fn decode(&mut self, line: &str) -> Result<StreamEvent, ProviderError> {
        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(_) => return Ok(StreamEvent::Raw(Value::String(line.to_string()))),
        };
        if value.get("type").and_then(Value::as_str) == Some("error") {
            self.stop();
            let err: BridgeError = serde_json::from_value(value).unwrap_or(BridgeError {
                status: None,
                message: line.to_string(),
                retry_at_ms: None,
            });
            return Err(ProviderError::from_status(
                err.status,
                err.message,
                err.retry_at_ms,
            ));
        }
        Ok(StreamEvent::from_json(value))
    }
}

impl Drop for BridgeEvents {
    fn drop(&mut self) {
        if !self.done {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ModelRef, Usage};
    use crate::error::ErrorClass;
    use crate::io::stream::collect_stream;

    fn run(script: &str, timeout: Duration) -> Result<crate::io::stream::StreamOutcome, ProviderError> {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut adapter = CommandStreamAdapter::new(
            vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            temp.path(),
            timeout,
        );
        let model = ModelRef::new("m", "p");
        let messages = vec![Message::user("hi")];
        let stream = adapter.stream(&StreamRequest {
            step: 1,
            model: &model,
            messages: &messages,
        })?;
        collect_stream(stream, Instant::now())
    }

    #[test]
    fn decodes_bridge_events() {
        let script = r#"cat >/dev/null
echo '{"type":"reasoning","text":"think"}'
echo '{"type":"text","text":"hello "}'
echo 'not json'
echo '{"type":"text","text":"world"}'
echo '{"type":"usage","input_tokens":5,"output_tokens":2}'"#;
        let outcome = run(script, Duration::from_secs(10)).expect("stream");
        assert_eq!(outcome.answer, "hello world");
        assert_eq!(outcome.reasoning, "think");
        assert_eq!(outcome.usage, Some(Usage::new(5, 0, 2)));
        assert_eq!(outcome.chunks.len(), 5);
    }

    /// The bridge receives the model and the full history on stdin.
    #[test]
    fn sends_request_on_stdin() {
        let script = r#"printf '{"type":"echo","request":'; cat; printf '}\n'"#;
        let outcome = run(script, Duration::from_secs(10)).expect("stream");
        let request = &outcome.chunks[0]["request"];
        assert_eq!(request["model"], "m");
        assert_eq!(request["provider"], "p");
        assert_eq!(request["messages"][0]["content"], "hi");
    }

    #[test]
    fn error_events_are_classified() {
        let script = r#"cat >/dev/null; echo '{"type":"error","status":429,"message":"busy","retry_at_ms":77}'"#;
        let err = run(script, Duration::from_secs(10)).expect_err("rate limited");
        assert_eq!(err.class(), ErrorClass::RateLimited);
        assert_eq!(err.retry_at_ms(), Some(77));

        let script = r#"cat >/dev/null; echo '{"type":"error","status":401,"message":"key"}'"#;
        let err = run(script, Duration::from_secs(10)).expect_err("fatal");
        assert_eq!(err.class(), ErrorClass::Fatal);
    }

    #[test]
    fn failing_bridge_is_transient() {
        let err = run("cat >/dev/null; echo oops >&2; exit 2", Duration::from_secs(10))
            .expect_err("exit 2");
        assert_eq!(err.class(), ErrorClass::Transient);
        assert!(err.to_string().contains("oops"));
    }

    #[test]
    fn silent_bridge_times_out() {
        let err = run("cat >/dev/null; exec sleep 5", Duration::from_millis(200)).expect_err("timeout");
        assert_eq!(err.class(), ErrorClass::Transient);
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn missing_command_is_fatal() {
        let mut adapter = CommandStreamAdapter::new(Vec::new(), ".", Duration::from_secs(1));
        let model = ModelRef::new("m", "p");
        let err = adapter
            .stream(&StreamRequest {
                step: 1,
                model: &model,
                messages: &[],
            })
            .err()
            .expect("no command");
        assert_eq!(err.class(), ErrorClass::Fatal);
    }
}
