//! Deterministic responses replayed from recorded step artifacts.
//!
//! A fixture directory has the same shape as a session directory
//! (`step/NNN/...`), so any recorded session can be replayed as is.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use tracing::debug;

use crate::core::tokens::estimate_usage;
use crate::core::types::Usage;
use crate::error::ProviderError;
use crate::io::paths::StepPaths;
use crate::io::stream::{EventStream, StreamAdapter, StreamEvent, StreamRequest};

/// Failure injected through `error.json`.
#[derive(Debug, Deserialize)]
struct ErrorFixture {
    status: Option<u16>,
    #[serde(default)]
    message: String,
    retry_at_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ResponseFixture {
    usage: Usage,
}

/// Replays `step/NNN/` fixtures instead of calling a provider.
#[derive(Debug)]
pub struct ReplayAdapter {
    dir: PathBuf,
    failed: BTreeSet<u32>,
}

impl ReplayAdapter {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(anyhow!("replay fixture {} is not a directory", dir.display()));
        }
        Ok(Self {
            dir,
            failed: BTreeSet::new(),
        })
    }

    fn step_paths(&self, step: u32) -> StepPaths {
        StepPaths::new(&self.dir.join("step"), step)
    }

    fn events(&self, step: &StepPaths, request: &StreamRequest<'_>) -> Result<Vec<StreamEvent>> {
        let mut events = match read_optional(&step.file("chunks.jsonl"))? {
            Some(chunks) => parse_chunks(&chunks, &step.file("chunks.jsonl"))?,
            None => text_events(step)?,
        };
        if events.iter().any(|e| matches!(e, StreamEvent::Usage(_))) {
            return Ok(events);
        }

        let usage = match read_usage(step)? {
            Some(usage) => usage,
            None => {
                let (reasoning, answer) = split_text(&events);
                estimate_usage(request.messages, &reasoning, &answer)
            }
        };
        events.push(StreamEvent::Usage(usage));
        Ok(events)
    }
}

impl StreamAdapter for ReplayAdapter {
    fn stream(&mut self, request: &StreamRequest<'_>) -> Result<EventStream, ProviderError> {
        let step = self.step_paths(request.step);
        if !step.dir.is_dir() {
            return Err(ProviderError::Fatal(format!(
                "no replay fixture for step {} in {}",
                request.step,
                self.dir.display()
            )));
        }

        let error_path = step.file("error.json");
        if error_path.is_file() && self.failed.insert(request.step) {
            let fixture = read_error(&error_path).map_err(|e| ProviderError::Fatal(format!("{e:#}")))?;
            debug!(step = request.step, status = ?fixture.status, "replaying recorded failure");
            return Err(ProviderError::from_status(
                fixture.status,
                fixture.message,
                fixture.retry_at_ms,
            ));
        }

        let events = self
            .events(&step, request)
            .map_err(|e| ProviderError::Fatal(format!("{e:#}")))?;
        debug!(step = request.step, events = events.len(), model = %request.model, "replaying step");
        Ok(Box::new(events.into_iter().map(Ok)))
    }
}

fn text_events(step: &StepPaths) -> Result<Vec<StreamEvent>> {
    let reasoning = read_optional(&step.file("reason.md"))?;
    let answer = read_optional(&step.file("answer.md"))?;
    let extra = read_optional(&step.file("stream.md"))?;
    if answer.is_none() && extra.is_none() {
        return Err(anyhow!("fixture {} has no answer", step.dir.display()));
    }

    let mut events: Vec<StreamEvent> = Vec::new();
    if let Some(reasoning) = reasoning {
        events.extend(split_keep_whitespace(&reasoning).map(StreamEvent::Reasoning));
    }
    let mut answer = answer.unwrap_or_default();
    if let Some(extra) = extra {
        answer.push_str(&extra);
    }
    events.extend(split_keep_whitespace(&answer).map(StreamEvent::Text));
    Ok(events)
}

/// Word-sized pieces whose concatenation is exactly `text`.
fn split_keep_whitespace(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split_inclusive(char::is_whitespace).map(str::to_string)
}

fn split_text(events: &[StreamEvent]) -> (String, String) {
    let mut reasoning = String::new();
    let mut answer = String::new();
    for event in events {
        match event {
            StreamEvent::Reasoning(text) => reasoning.push_str(text),
            StreamEvent::Text(text) => answer.push_str(text),
            StreamEvent::Usage(_) | StreamEvent::Raw(_) => {}
        }
    }
    (reasoning, answer)
}

fn parse_chunks(contents: &str, path: &Path) -> Result<Vec<StreamEvent>> {
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line)
                .map(StreamEvent::from_json)
                .with_context(|| format!("parse {} line {}", path.display(), idx + 1))
        })
        .collect()
}

fn read_usage(step: &StepPaths) -> Result<Option<Usage>> {
    if let Some(raw) = read_optional(&step.file("usage.json"))? {
        let usage = serde_json::from_str(&raw)
            .with_context(|| format!("parse {}", step.file("usage.json").display()))?;
        return Ok(Some(usage));
    }
    if let Some(raw) = read_optional(&step.file("response.json"))? {
        let response: ResponseFixture = serde_json::from_str(&raw)
            .with_context(|| format!("parse {}", step.file("response.json").display()))?;
        return Ok(Some(response.usage));
    }
    Ok(None)
}

fn read_error(path: &Path) -> Result<ErrorFixture> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    if !path.is_file() {
        return Ok(None);
    }
    fs::read_to_string(path)
        .map(Some)
        .with_context(|| format!("read {}", path.display()))
}
