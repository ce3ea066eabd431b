//! Opening a chat session: config, store and the seeded system message.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::core::types::{Message, Role};
use crate::io::chat_store::ChatStore;
use crate::io::config::{PairloopConfig, load_config};
use crate::io::paths::PairloopPaths;
use crate::io::system_prompt::system_prompt;

/// Everything a loop needs that lives on disk.
#[derive(Debug)]
pub struct Session {
    pub paths: PairloopPaths,
    pub config: PairloopConfig,
    pub store: ChatStore,
}

impl Session {
    /// Load `.pairloop/config.toml` and open the active session.
    ///
    /// With `new`, the active session is archived first.
    pub fn open(root: &Path, new: bool) -> Result<Self> {
        let paths = PairloopPaths::new(root);
        let config = load_config(&paths.config_path)
            .with_context(|| format!("load {}", paths.config_path.display()))?;
        Self::open_with(paths, config, new)
    }

    /// Like [`Session::open`] with an already loaded config.
    #[instrument(skip_all, fields(root = %paths.root.display(), new = new))]
    pub fn open_with(paths: PairloopPaths, config: PairloopConfig, new: bool) -> Result<Self> {
        let mut store = if new {
            ChatStore::start_new(&paths)?
        } else {
            ChatStore::init(&paths)?
        };
        seed_system_message(&paths, &mut store)?;
        info!(id = store.id(), messages = store.messages().len(), "session open");
        Ok(Self {
            paths,
            config,
            store,
        })
    }
}

/// Add the system message to an empty session and persist it.
fn seed_system_message(paths: &PairloopPaths, store: &mut ChatStore) -> Result<()> {
    if store
        .messages()
        .first()
        .is_some_and(|m| m.role == Role::System)
    {
        return Ok(());
    }
    if !store.messages().is_empty() {
        // An older log without a system message is used as is.
        return Ok(());
    }
    store.add(Message::system(system_prompt(paths)?))?;
    store.save_messages()
}
