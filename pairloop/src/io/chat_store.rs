//! Session persistence: the message log plus per-step artifacts.
//!
//! Layout under `.pairloop/chat/`:
//!
//! - `current` holds the active session id.
//! - `<id>/messages.jsonl` is the full message log, rewritten atomically on
//!   every save.
//! - `<id>/step/NNN/*` are the artifacts of step `NNN`. `meta.json` is written
//!   last; once it exists the step is complete and its files are immutable.
//!
//! Archived sessions move to `.pairloop/archive/<shortkey>/chat/` next to a
//! compact `chat.json` snapshot. Nothing is ever deleted.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::core::types::{Message, ModelInfo, ModelRef, Role, Usage};
use crate::io::paths::{PairloopPaths, SessionPaths, StepPaths, parse_step_dir_name};

/// Named per-step artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepArtifact {
    /// Packed prompt text.
    Prompt,
    /// `ModelInfo` of the model that produced the answer.
    Model,
    Answer,
    Reason,
    Usage,
    /// Raw stream events, one JSON object per line.
    Chunks,
    /// Parsed test summary.
    Tests,
    /// Raw test stdout/stderr.
    TestLog,
    Meta,
}

impl StepArtifact {
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Prompt => "prompt.md",
            Self::Model => "model.json",
            Self::Answer => "answer.md",
            Self::Reason => "reason.md",
            Self::Usage => "usage.json",
            Self::Chunks => "chunks.jsonl",
            Self::Tests => "tests.json",
            Self::TestLog => "tests.log",
            Self::Meta => "meta.json",
        }
    }
}

/// How a completed step ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepStatus {
    Pass,
    NeedsFix,
    /// The user answered the unpack gate with a new message.
    Replied,
    Cancelled,
}

/// Completion record for a step (`meta.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepMeta {
    pub step: u32,
    pub model: ModelRef,
    pub status: StepStatus,
    /// Send attempts, 2 when a fallback model was used.
    pub attempts: u32,
    pub started_at: String,
    pub finished_at: String,
}

/// Compact snapshot written next to an archived session (`chat.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveSnapshot {
    pub id: String,
    pub archived_at: String,
    pub messages: usize,
    pub steps: usize,
    pub usage: Usage,
    pub cost: f64,
}

/// One row of `pairloop list`.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub id: String,
    /// `None` for the active session.
    pub archived_at: Option<String>,
    pub messages: usize,
    pub steps: usize,
    pub cost: f64,
}

/// The active session.
#[derive(Debug, Clone)]
pub struct ChatStore {
    paths: PairloopPaths,
    id: String,
    session: SessionPaths,
    messages: Vec<Message>,
}

impl ChatStore {
    /// Open the active session, creating one when none exists.
    ///
    /// Idempotent: a second call returns the same id and the same messages.
    #[instrument(skip_all, fields(root = %paths.root.display()))]
    pub fn init(paths: &PairloopPaths) -> Result<Self> {
        fs::create_dir_all(&paths.chat_dir)
            .with_context(|| format!("create directory {}", paths.chat_dir.display()))?;
        let id = match read_current_id(&paths.current_path)? {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().hyphenated().to_string();
                write_atomic(&paths.current_path, &format!("{id}\n"))?;
                debug!(%id, "created session");
                id
            }
        };
        let session = SessionPaths::new(&paths.session_dir(&id));
        fs::create_dir_all(&session.steps_dir)
            .with_context(|| format!("create directory {}", session.steps_dir.display()))?;
        let messages = read_messages(&session.messages_path)?;
        Ok(Self {
            paths: paths.clone(),
            id,
            session,
            messages,
        })
    }

    /// Archive the active session (if any) and open a fresh one.
    pub fn start_new(paths: &PairloopPaths) -> Result<Self> {
        if read_current_id(&paths.current_path)?.is_some() {
            Self::init(paths)?.archive()?;
        }
        Self::init(paths)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dir(&self) -> &Path {
        &self.session.dir
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// In-memory append. Enforces system-first, then user/assistant alternation.
    pub fn add(&mut self, message: Message) -> Result<()> {
        let last = self.messages.last().map(|m| m.role);
        let allowed = match message.role {
            Role::System => last.is_none(),
            Role::User | Role::Tool => {
                matches!(last, None | Some(Role::System) | Some(Role::Assistant))
            }
            Role::Assistant => matches!(last, Some(Role::User) | Some(Role::Tool)),
        };
        if !allowed {
            bail!(
                "message order violation: {} after {}",
                message.role.as_str(),
                last.map_or("start", Role::as_str)
            );
        }
        self.messages.push(message);
        Ok(())
    }

    /// Persist the entire message log (write-then-rename).
    pub fn save_messages(&self) -> Result<()> {
        let mut buf = String::new();
        for message in &self.messages {
            buf.push_str(&serde_json::to_string(message).context("serialize message")?);
            buf.push('\n');
        }
        write_atomic(&self.session.messages_path, &buf)
    }

    /// Re-read the message log from disk.
    pub fn load_messages(&self) -> Result<Vec<Message>> {
        read_messages(&self.session.messages_path)
    }

    pub fn step_paths(&self, step: u32) -> StepPaths {
        self.session.step(step)
    }

    pub fn artifact_path(&self, step: u32, artifact: StepArtifact) -> PathBuf {
        self.step_paths(step).file(artifact.file_name())
    }

    pub fn is_step_complete(&self, step: u32) -> bool {
        self.step_paths(step).meta_path.is_file()
    }

    /// Write a text artifact. Completed steps are read-only.
    pub fn save_artifact(&self, step: u32, artifact: StepArtifact, contents: &str) -> Result<()> {
        if self.is_step_complete(step) {
            bail!(
                "step {step} is complete; refusing to overwrite {}",
                artifact.file_name()
            );
        }
        write_atomic(&self.artifact_path(step, artifact), contents)
    }

    /// Write a JSON artifact, pretty-printed with a trailing newline.
    pub fn save_json<T: Serialize>(&self, step: u32, artifact: StepArtifact, value: &T) -> Result<()> {
        let mut buf = serde_json::to_string_pretty(value)
            .with_context(|| format!("serialize {}", artifact.file_name()))?;
        buf.push('\n');
        self.save_artifact(step, artifact, &buf)
    }

    /// Read a text artifact; `None` when it was never written.
    pub fn load_artifact(&self, step: u32, artifact: StepArtifact) -> Result<Option<String>> {
        let path = self.artifact_path(step, artifact);
        if !path.exists() {
            return Ok(None);
        }
        fs::read_to_string(&path)
            .map(Some)
            .with_context(|| format!("read {}", path.display()))
    }

    pub fn load_json<T: DeserializeOwned>(&self, step: u32, artifact: StepArtifact) -> Result<Option<T>> {
        let Some(contents) = self.load_artifact(step, artifact)? else {
            return Ok(None);
        };
        let path = self.artifact_path(step, artifact);
        serde_json::from_str(&contents)
            .map(Some)
            .with_context(|| format!("parse {}", path.display()))
    }

    /// Mark a step complete by writing `meta.json`.
    pub fn complete_step(&self, meta: &StepMeta) -> Result<()> {
        self.save_json(meta.step, StepArtifact::Meta, meta)?;
        debug!(step = meta.step, status = ?meta.status, "step complete");
        Ok(())
    }

    /// Discard a partially written step so it can be prepared from scratch.
    pub fn reset_step(&self, step: u32) -> Result<()> {
        let paths = self.step_paths(step);
        if self.is_step_complete(step) {
            bail!("step {step} is complete and cannot be reset");
        }
        if paths.dir.exists() {
            fs::remove_dir_all(&paths.dir)
                .with_context(|| format!("remove {}", paths.dir.display()))?;
        }
        Ok(())
    }

    /// Step numbers that have a directory, ascending.
    pub fn steps(&self) -> Result<Vec<u32>> {
        list_steps(&self.session.steps_dir)
    }

    pub fn completed_steps(&self) -> Result<Vec<u32>> {
        Ok(self
            .steps()?
            .into_iter()
            .filter(|step| self.is_step_complete(*step))
            .collect())
    }

    /// One more than the highest completed step.
    pub fn next_step(&self) -> Result<u32> {
        Ok(self.completed_steps()?.last().map_or(1, |last| last + 1))
    }

    /// Usage summed over every step that recorded one.
    pub fn usage(&self) -> Result<Usage> {
        let mut total = Usage::default();
        for step in self.steps()? {
            if let Some(usage) = self.load_json::<Usage>(step, StepArtifact::Usage)? {
                total += usage;
            }
        }
        Ok(total)
    }

    /// Dollar cost of every step, using the pricing persisted with each step.
    pub fn cost(&self) -> Result<f64> {
        let mut total = 0.0;
        for step in self.steps()? {
            let usage = self.load_json::<Usage>(step, StepArtifact::Usage)?;
            let model = self.load_json::<ModelInfo>(step, StepArtifact::Model)?;
            if let (Some(usage), Some(model)) = (usage, model) {
                total += model.pricing.cost(&usage);
            }
        }
        Ok(total)
    }

    /// Move this session to the archive and clear the `current` pointer.
    #[instrument(skip_all, fields(id = %self.id))]
    pub fn archive(self) -> Result<PathBuf> {
        let snapshot = ArchiveSnapshot {
            id: self.id.clone(),
            archived_at: Utc::now().to_rfc3339(),
            messages: self.messages.len(),
            steps: self.steps()?.len(),
            usage: self.usage()?,
            cost: self.cost()?,
        };
        let dest = self.paths.archive_dir.join(short_key(&self.id)?);
        let chat_dest = dest.join("chat");
        if chat_dest.exists() {
            bail!("archive {} already exists", chat_dest.display());
        }
        fs::create_dir_all(&dest).with_context(|| format!("create directory {}", dest.display()))?;
        if self.session.dir.exists() {
            fs::rename(&self.session.dir, &chat_dest).with_context(|| {
                format!(
                    "move {} to {}",
                    self.session.dir.display(),
                    chat_dest.display()
                )
            })?;
        }
        let mut buf = serde_json::to_string_pretty(&snapshot).context("serialize chat.json")?;
        buf.push('\n');
        write_atomic(&dest.join("chat.json"), &buf)?;

        if read_current_id(&self.paths.current_path)?.as_deref() == Some(self.id.as_str()) {
            fs::remove_file(&self.paths.current_path)
                .with_context(|| format!("remove {}", self.paths.current_path.display()))?;
        }
        debug!(dest = %dest.display(), "archived session");
        Ok(dest)
    }
}

/// Active session first, then archived ones by archive time.
pub fn list_sessions(paths: &PairloopPaths) -> Result<Vec<SessionSummary>> {
    let mut sessions = Vec::new();
    if let Some(id) = read_current_id(&paths.current_path)? {
        let store = ChatStore::init(paths)?;
        sessions.push(SessionSummary {
            id,
            archived_at: None,
            messages: store.messages().len(),
            steps: store.steps()?.len(),
            cost: store.cost()?,
        });
    }

    let mut archived = Vec::new();
    if paths.archive_dir.is_dir() {
        for entry in WalkDir::new(&paths.archive_dir).sort_by_file_name() {
            let entry = entry.with_context(|| format!("walk {}", paths.archive_dir.display()))?;
            if !entry.file_type().is_file() || entry.file_name() != "chat.json" {
                continue;
            }
            let contents = fs::read_to_string(entry.path())
                .with_context(|| format!("read {}", entry.path().display()))?;
            match serde_json::from_str::<ArchiveSnapshot>(&contents) {
                Ok(snapshot) => archived.push(snapshot),
                Err(err) => warn!(path = %entry.path().display(), %err, "skipping bad snapshot"),
            }
        }
    }
    archived.sort_by(|a, b| a.archived_at.cmp(&b.archived_at));
    sessions.extend(archived.into_iter().map(|s| SessionSummary {
        id: s.id,
        archived_at: Some(s.archived_at),
        messages: s.messages,
        steps: s.steps,
        cost: s.cost,
    }));
    Ok(sessions)
}

/// Filesystem-safe archive key: each hex group of the id in base 36, joined by `/`.
pub fn short_key(id: &str) -> Result<String> {
    let groups = id
        .split('-')
        .map(|group| {
            u128::from_str_radix(group, 16)
                .map(to_base36)
                .map_err(|_| anyhow!("session id '{id}' is not hyphenated hex"))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(groups.join("/"))
}

fn to_base36(mut value: u128) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

fn read_current_id(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let id = raw.trim();
    Ok((!id.is_empty()).then(|| id.to_string()))
}

fn read_messages(path: &Path) -> Result<Vec<Message>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("parse {} line {}", path.display(), idx + 1))
        })
        .collect()
}

fn list_steps(steps_dir: &Path) -> Result<Vec<u32>> {
    if !steps_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut steps = Vec::new();
    for entry in
        fs::read_dir(steps_dir).with_context(|| format!("read dir {}", steps_dir.display()))?
    {
        let entry = entry.with_context(|| format!("read dir {}", steps_dir.display()))?;
        if !entry.path().is_dir() {
            continue;
        }
        if let Some(step) = entry.file_name().to_str().and_then(parse_step_dir_name) {
            steps.push(step);
        }
    }
    steps.sort_unstable();
    Ok(steps)
}

/// Write `contents` next to `path` and rename over it.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let file_name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    fs::write(&tmp_path, contents).with_context(|| format!("write {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
