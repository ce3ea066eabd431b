//! Model selection and fallback.
//!
//! Tiers are ordered by token ceiling. A chat is served by the first tier
//! whose ceiling it stays under; a tier that has nothing available right now
//! hands over to the next one. Ties always resolve to the earlier position in
//! a tier's static list so selection is reproducible.

use std::collections::BTreeMap;

use tracing::debug;

use crate::core::types::ModelRef;
use crate::error::{NoSuitableModel, ProviderError};

/// Backoff applied to a rate-limited model when the server gives no retry time.
pub const DEFAULT_BACKOFF_MS: u64 = 30_000;

/// Next-available (or last-used) timestamps in unix milliseconds.
///
/// Process-lifetime only; never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitMemory {
    entries: BTreeMap<ModelRef, u64>,
}

impl RateLimitMemory {
    /// Recorded timestamp, `0` when the model was never seen.
    pub fn get(&self, model: &ModelRef) -> u64 {
        self.entries.get(model).copied().unwrap_or(0)
    }

    pub fn record(&mut self, model: ModelRef, at_ms: u64) {
        self.entries.insert(model, at_ms);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// How a tier chooses among its candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierPolicy {
    /// Earliest-available candidate, honoring rate-limit backoff.
    Backoff,
    /// Least recently stamped candidate; availability, not time, drives choice.
    LeastRecentlyUsed,
    /// Always the first candidate.
    Single,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tier {
    /// Exclusive upper bound on chat tokens served by this tier.
    pub max_tokens: u64,
    pub provider: String,
    pub models: Vec<String>,
    pub policy: TierPolicy,
}

impl Tier {
    fn candidates(&self) -> Vec<ModelRef> {
        self.models
            .iter()
            .map(|id| ModelRef::new(id, &self.provider))
            .collect()
    }
}

/// Inputs for one selection.
#[derive(Debug, Clone, Copy)]
pub struct SelectionInput<'a> {
    pub current: &'a ModelRef,
    /// Total estimated chat tokens, history plus the pending prompt.
    pub tokens: u64,
    pub error: Option<&'a ProviderError>,
    pub now_ms: u64,
}

/// Picks the model for the next request.
pub trait ModelStrategy {
    fn select(
        &self,
        input: &SelectionInput<'_>,
        memory: &mut RateLimitMemory,
    ) -> Result<ModelRef, NoSuitableModel>;
}

/// Cheap-and-fast first, larger context only when the chat needs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastestStrategy {
    tiers: Vec<Tier>,
    backoff_ms: u64,
}

impl Default for FastestStrategy {
    fn default() -> Self {
        Self::new(
            vec![
                Tier {
                    max_tokens: 60_000,
                    provider: "cerebras".to_string(),
                    models: strings(&[
                        "qwen-3-235b-a22b-instruct-2507",
                        "gpt-oss-120b",
                        "qwen-3-32b",
                        "zai-glm-4.6",
                    ]),
                    policy: TierPolicy::Backoff,
                },
                Tier {
                    max_tokens: 200_000,
                    provider: "huggingface/cerebras".to_string(),
                    models: strings(&[
                        "Qwen/Qwen3-32B",
                        "openai/gpt-oss-120b",
                        "Qwen/Qwen3-235B-A22B-Thinking-2507",
                        "zai-org/GLM-4.6",
                    ]),
                    policy: TierPolicy::LeastRecentlyUsed,
                },
                Tier {
                    max_tokens: 2_000_000,
                    provider: "openrouter".to_string(),
                    models: strings(&["grok-4-fast"]),
                    policy: TierPolicy::Single,
                },
            ],
            DEFAULT_BACKOFF_MS,
        )
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl FastestStrategy {
    pub fn new(mut tiers: Vec<Tier>, backoff_ms: u64) -> Self {
        tiers.sort_by_key(|tier| tier.max_tokens);
        Self { tiers, backoff_ms }
    }

    pub fn tiers(&self) -> &[Tier] {
        &self.tiers
    }

    /// Every model this strategy may return.
    pub fn candidates(&self) -> Vec<ModelRef> {
        self.tiers.iter().flat_map(Tier::candidates).collect()
    }

    fn select_backoff(
        &self,
        tier: &Tier,
        input: &SelectionInput<'_>,
        memory: &mut RateLimitMemory,
    ) -> Option<ModelRef> {
        let candidates = tier.candidates();
        let in_tier = candidates.contains(input.current);
        match input.error {
            Some(err) if in_tier => {
                let until = err
                    .retry_at_ms()
                    .unwrap_or(input.now_ms + self.backoff_ms);
                memory.record(input.current.clone(), until);
            }
            None if in_tier && memory.get(input.current) <= input.now_ms => {
                return Some(input.current.clone());
            }
            _ => {}
        }
        // `min_by_key` keeps the first of equal minima, i.e. list order.
        let best = candidates.iter().min_by_key(|m| memory.get(m))?;
        (memory.get(best) <= input.now_ms).then(|| best.clone())
    }

    fn select_lru(
        &self,
        tier: &Tier,
        input: &SelectionInput<'_>,
        memory: &mut RateLimitMemory,
    ) -> Option<ModelRef> {
        let candidates = tier.candidates();
        let in_tier = candidates.contains(input.current);
        match input.error {
            Some(err) if in_tier => {
                let stamp = err.retry_at_ms().unwrap_or(input.now_ms);
                memory.record(input.current.clone(), stamp);
            }
            None if in_tier => return Some(input.current.clone()),
            _ => {}
        }
        let best = candidates.iter().min_by_key(|m| memory.get(m))?.clone();
        memory.record(best.clone(), input.now_ms);
        Some(best)
    }
}

impl ModelStrategy for FastestStrategy {
    fn select(
        &self,
        input: &SelectionInput<'_>,
        memory: &mut RateLimitMemory,
    ) -> Result<ModelRef, NoSuitableModel> {
        for tier in &self.tiers {
            if input.tokens >= tier.max_tokens {
                continue;
            }
            let picked = match tier.policy {
                TierPolicy::Backoff => self.select_backoff(tier, input, memory),
                TierPolicy::LeastRecentlyUsed => self.select_lru(tier, input, memory),
                TierPolicy::Single => tier.candidates().into_iter().next(),
            };
            if let Some(model) = picked {
                debug!(
                    tokens = input.tokens,
                    tier_max = tier.max_tokens,
                    model = %model,
                    "selected model"
                );
                return Ok(model);
            }
        }
        Err(NoSuitableModel {
            tokens: input.tokens,
        })
    }
}
