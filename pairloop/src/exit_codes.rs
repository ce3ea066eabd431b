//! Stable exit codes for pairloop CLI commands.

/// Tests pass, the user cancelled at a gate, or a non-chat command succeeded.
pub const OK: i32 = 0;
/// Fatal error: provider fallback exhausted, invalid config, I/O failure.
pub const FATAL: i32 = 1;
/// The failure budget ran out before the tests passed.
pub const STUCK: i32 = 3;
