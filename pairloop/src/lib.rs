//! AI pair-programming loop.
//!
//! A chat step packs project files into a prompt, streams an answer from a
//! model, unpacks the answer into files and commands, and runs the test suite.
//! Failing tests become the next prompt until they pass or the failure budget
//! is spent. The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (test output parsing, model
//!   selection, progress accounting). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (session storage, providers,
//!   processes, packing, git). Isolated behind traits to enable scripted tests.
//!
//! Orchestration modules ([`session`], [`step`], [`looping`]) combine the two
//! into the chat loop the CLI runs.

pub mod console;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod session;
pub mod step;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
