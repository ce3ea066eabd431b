//! Side-effecting adapters: filesystem, processes, providers, the terminal.

pub mod chat_store;
pub mod commands;
pub mod config;
pub mod gate;
pub mod git;
pub mod pack;
pub mod paths;
pub mod process;
pub mod provider;
pub mod replay;
pub mod stream;
pub mod system_prompt;
pub mod test_runner;
pub mod unpack;
