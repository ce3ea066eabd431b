//! Canonical locations inside `.pairloop/`.

use std::path::{Path, PathBuf};

/// Fixed paths for a project root.
#[derive(Debug, Clone)]
pub struct PairloopPaths {
    pub root: PathBuf,
    pub state_dir: PathBuf,
    pub config_path: PathBuf,
    pub system_override_path: PathBuf,
    pub agent_override_path: PathBuf,
    pub chat_dir: PathBuf,
    pub current_path: PathBuf,
    pub archive_dir: PathBuf,
}

impl PairloopPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let state_dir = root.join(".pairloop");
        let chat_dir = state_dir.join("chat");
        Self {
            root: root.clone(),
            config_path: state_dir.join("config.toml"),
            system_override_path: state_dir.join("system.md"),
            agent_override_path: state_dir.join("agent.md"),
            current_path: chat_dir.join("current"),
            archive_dir: state_dir.join("archive"),
            chat_dir,
            state_dir,
        }
    }

    pub fn session_dir(&self, id: &str) -> PathBuf {
        self.chat_dir.join(id)
    }
}

/// Files owned by one session.
#[derive(Debug, Clone)]
pub struct SessionPaths {
    pub dir: PathBuf,
    pub messages_path: PathBuf,
    pub steps_dir: PathBuf,
}

impl SessionPaths {
    pub fn new(session_dir: &Path) -> Self {
        Self {
            dir: session_dir.to_path_buf(),
            messages_path: session_dir.join("messages.jsonl"),
            steps_dir: session_dir.join("step"),
        }
    }

    pub fn step(&self, step: u32) -> StepPaths {
        StepPaths::new(&self.steps_dir, step)
    }
}

/// Per-step artifact files under `step/NNN/`.
#[derive(Debug, Clone)]
pub struct StepPaths {
    pub dir: PathBuf,
    pub meta_path: PathBuf,
}

impl StepPaths {
    pub fn new(steps_dir: &Path, step: u32) -> Self {
        let dir = steps_dir.join(step_dir_name(step));
        Self {
            meta_path: dir.join("meta.json"),
            dir,
        }
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

/// Zero-padded step directory name.
pub fn step_dir_name(step: u32) -> String {
    format!("{step:03}")
}

/// Inverse of [`step_dir_name`]; `None` for anything that is not all digits.
pub fn parse_step_dir_name(name: &str) -> Option<u32> {
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    name.parse().ok()
}
