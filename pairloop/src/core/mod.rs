//! Deterministic, pure logic shared by the chat loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod progress;
pub mod strategy;
pub mod test_output;
pub mod tokens;
pub mod types;
