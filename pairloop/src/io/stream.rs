//! Streaming contract shared by the live and replay adapters.
//!
//! The orchestrator only sees [`StreamAdapter`]: given a model and the message
//! history it yields [`StreamEvent`]s, and every failure arrives already
//! classified as a [`ProviderError`].

use std::time::Instant;

use serde_json::{Value, json};

use crate::core::progress::Timeline;
use crate::core::types::{Message, ModelRef, Usage};
use crate::error::ProviderError;

/// One decoded event of a model response.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Reasoning(String),
    Text(String),
    Usage(Usage),
    /// Anything the adapter passed through without interpreting.
    Raw(Value),
}

impl StreamEvent {
    /// Wire/fixture form: `{"type": "text", "text": "..."}` and friends.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Reasoning(text) => json!({ "type": "reasoning", "text": text }),
            Self::Text(text) => json!({ "type": "text", "text": text }),
            Self::Usage(usage) => {
                let mut value = json!(usage);
                if let Some(map) = value.as_object_mut() {
                    map.insert("type".to_string(), json!("usage"));
                }
                value
            }
            Self::Raw(value) => value.clone(),
        }
    }

    /// Inverse of [`to_json`](Self::to_json). Unknown shapes become `Raw`.
    pub fn from_json(value: Value) -> Self {
        let text = || value.get("text").and_then(Value::as_str).map(str::to_string);
        match value.get("type").and_then(Value::as_str) {
            Some("reasoning") => {
                if let Some(text) = text() {
                    return Self::Reasoning(text);
                }
            }
            Some("text") => {
                if let Some(text) = text() {
                    return Self::Text(text);
                }
            }
            Some("usage") => {
                if let Ok(usage) = serde_json::from_value::<Usage>(value.clone()) {
                    return Self::Usage(usage);
                }
            }
            _ => {}
        }
        Self::Raw(value)
    }
}

/// What an adapter is asked to answer.
#[derive(Debug, Clone, Copy)]
pub struct StreamRequest<'a> {
    pub step: u32,
    pub model: &'a ModelRef,
    pub messages: &'a [Message],
}

pub type EventStream = Box<dyn Iterator<Item = Result<StreamEvent, ProviderError>>>;

/// Source of model responses.
pub trait StreamAdapter {
    fn stream(&mut self, request: &StreamRequest<'_>) -> Result<EventStream, ProviderError>;
}

/// Fully consumed response.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamOutcome {
    pub reasoning: String,
    pub answer: String,
    /// Usage reported by the provider, if any.
    pub usage: Option<Usage>,
    /// Every event in arrival order, in wire form.
    pub chunks: Vec<Value>,
    pub timeline: Timeline,
}

/// Collects events and stamps phase boundaries as they arrive.
#[derive(Debug)]
pub struct StreamAccumulator {
    started: Instant,
    reasoning: String,
    answer: String,
    usage: Option<Usage>,
    chunks: Vec<Value>,
    timeline: Timeline,
}

impl StreamAccumulator {
    pub fn new(started: Instant) -> Self {
        Self {
            started,
            reasoning: String::new(),
            answer: String::new(),
            usage: None,
            chunks: Vec::new(),
            timeline: Timeline::default(),
        }
    }

    pub fn push(&mut self, event: StreamEvent) {
        let at = self.started.elapsed();
        self.timeline.first_event.get_or_insert(at);
        self.chunks.push(event.to_json());
        match event {
            StreamEvent::Reasoning(text) => {
                self.timeline.first_reasoning.get_or_insert(at);
                self.reasoning.push_str(&text);
            }
            StreamEvent::Text(text) => {
                self.timeline.first_answer.get_or_insert(at);
                self.answer.push_str(&text);
            }
            StreamEvent::Usage(usage) => self.usage = Some(usage),
            StreamEvent::Raw(_) => {}
        }
    }

    pub fn finish(mut self) -> StreamOutcome {
        self.timeline.finished = self.started.elapsed();
        StreamOutcome {
            reasoning: self.reasoning,
            answer: self.answer,
            usage: self.usage,
            chunks: self.chunks,
            timeline: self.timeline,
        }
    }
}

/// Drain `stream`, stopping at the first error.
pub fn collect_stream(stream: EventStream, started: Instant) -> Result<StreamOutcome, ProviderError> {
    let mut acc = StreamAccumulator::new(started);
    for event in stream {
        acc.push(event?);
    }
    Ok(acc.finish())
}
