//! Typed errors that orchestration must tell apart.
//!
//! Everything else travels as `anyhow::Error` with context. These types are
//! recovered with `downcast_ref` at the points where the loop decides between
//! retrying, falling back to another model, or stopping.

use thiserror::Error;

/// Coarse classification used by the retry/fallback policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Provider asked us to slow down (HTTP 429 or equivalent).
    RateLimited,
    /// Network failure, timeout or 5xx-class response.
    Transient,
    /// Anything the provider will keep rejecting.
    Fatal,
}

/// Error raised by a stream adapter.
///
/// Adapters map transport-specific failures into these variants; the
/// orchestrator never inspects error messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Rate limit hit for the requested model
    #[error("rate limited: {message}")]
    RateLimited {
        /// Provider message
        message: String,
        /// Server-supplied time (unix ms) when the model becomes available again
        retry_at_ms: Option<u64>,
    },

    /// Network/5xx-class failure, eligible for fallback
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Non-retryable provider failure
    #[error("provider error: {0}")]
    Fatal(String),
}

impl ProviderError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::RateLimited { .. } => ErrorClass::RateLimited,
            Self::Transient(_) => ErrorClass::Transient,
            Self::Fatal(_) => ErrorClass::Fatal,
        }
    }

    /// Rate limits and transient failures qualify for the one fallback retry.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Fatal(_))
    }

    /// Server-supplied availability time, if any.
    pub fn retry_at_ms(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_at_ms, .. } => *retry_at_ms,
            _ => None,
        }
    }

    /// Classify an HTTP-like status code reported by a provider bridge.
    pub fn from_status(status: Option<u16>, message: String, retry_at_ms: Option<u64>) -> Self {
        match status {
            Some(429) => Self::RateLimited {
                message,
                retry_at_ms,
            },
            None | Some(408) => Self::Transient(message),
            Some(code) if code >= 500 => Self::Transient(message),
            Some(_) => Self::Fatal(message),
        }
    }
}

/// The chat outgrew every model the strategy knows about.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("no suitable model for {tokens} tokens")]
pub struct NoSuitableModel {
    pub tokens: u64,
}

/// A model id/provider pair missing from the catalog.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown model '{id}' (provider '{provider}')")]
pub struct UnknownModel {
    pub id: String,
    pub provider: String,
}

/// Marker counters printed by the test runner disagree with the parsed records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("parser inconsistency for '{counter}': markers say {markers}, records say {records}")]
pub struct ParserInconsistency {
    pub counter: String,
    pub markers: u64,
    pub records: u64,
}
