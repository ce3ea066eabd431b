//! Cheap token estimates used before a provider reports real usage.

use crate::core::types::{Message, Usage};

/// Rough token count: one token per four characters, rounded up.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

/// Estimated tokens of the whole message history.
pub fn estimate_messages(messages: &[Message]) -> u64 {
    messages.iter().map(|m| estimate_tokens(&m.content)).sum()
}

pub fn word_count(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}

/// Usage for a response whose provider did not report any.
pub fn estimate_usage(messages: &[Message], reasoning: &str, answer: &str) -> Usage {
    Usage::new(
        estimate_messages(messages),
        word_count(reasoning),
        word_count(answer),
    )
}
