//! Shared deterministic types for the chat loop.
//!
//! These types define stable contracts between core components and the
//! persisted artifacts. They must not depend on external state or I/O.

use std::fmt;
use std::ops::AddAssign;

use serde::{Deserialize, Serialize};

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// One entry of the session message log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Token accounting for one model response.
///
/// The total is always derived from the three components. A persisted
/// `total_tokens` field is written for readers but ignored on load, so an
/// inconsistent file cannot produce an inconsistent value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "UsageRecord", into = "UsageRecord")]
pub struct Usage {
    pub input_tokens: u64,
    pub reasoning_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn new(input_tokens: u64, reasoning_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            reasoning_tokens,
            output_tokens,
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.reasoning_tokens + self.output_tokens
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, rhs: Self) {
        self.input_tokens += rhs.input_tokens;
        self.reasoning_tokens += rhs.reasoning_tokens;
        self.output_tokens += rhs.output_tokens;
    }
}

#[derive(Serialize, Deserialize)]
struct UsageRecord {
    #[serde(default, alias = "inputTokens")]
    input_tokens: u64,
    #[serde(default, alias = "reasoningTokens")]
    reasoning_tokens: u64,
    #[serde(default, alias = "outputTokens")]
    output_tokens: u64,
    #[serde(default, alias = "totalTokens")]
    total_tokens: u64,
}

impl From<UsageRecord> for Usage {
    fn from(record: UsageRecord) -> Self {
        Self::new(
            record.input_tokens,
            record.reasoning_tokens,
            record.output_tokens,
        )
    }
}

impl From<Usage> for UsageRecord {
    fn from(usage: Usage) -> Self {
        Self {
            input_tokens: usage.input_tokens,
            reasoning_tokens: usage.reasoning_tokens,
            output_tokens: usage.output_tokens,
            total_tokens: usage.total_tokens(),
        }
    }
}

/// Price per single token, in dollars. Missing fields mean free.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pricing {
    pub prompt: f64,
    pub completion: f64,
    pub cache_read: f64,
    pub cache_write: f64,
}

impl Pricing {
    /// Dollar cost of `usage`: prompt price for input, completion price for the rest.
    pub fn cost(&self, usage: &Usage) -> f64 {
        usage.input_tokens as f64 * self.prompt
            + (usage.reasoning_tokens + usage.output_tokens) as f64 * self.completion
    }

    /// The same prices scaled to one million tokens (display unit).
    pub fn per_million(&self) -> Self {
        Self {
            prompt: self.prompt * 1e6,
            completion: self.completion * 1e6,
            cache_read: self.cache_read * 1e6,
            cache_write: self.cache_write * 1e6,
        }
    }
}

/// (model id, provider) pair identifying a concrete endpoint.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModelRef {
    pub id: String,
    pub provider: String,
}

impl ModelRef {
    pub fn new(id: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            provider: provider.into(),
        }
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.provider.is_empty() {
            write!(f, "{}", self.id)
        } else {
            write!(f, "{}@{}", self.id, self.provider)
        }
    }
}

fn default_modality() -> String {
    "text".to_string()
}

/// Catalog entry for a model a provider serves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub provider: String,
    pub context_length: u64,
    #[serde(default = "default_modality")]
    pub modality: String,
    #[serde(default)]
    pub pricing: Pricing,
}

impl ModelInfo {
    pub fn model_ref(&self) -> ModelRef {
        ModelRef::new(&self.id, &self.provider)
    }

    pub fn matches(&self, model: &ModelRef) -> bool {
        self.id == model.id && self.provider == model.provider
    }
}
