//! Events delivered by a streamed agent invocation.
//!
//! A stream interleaves response text with trace events. Only guardrail
//! traces are modeled in detail; every other trace family is kept as its
//! kind name.

use serde::{Deserialize, Serialize};

use crate::guardrail::{Assessment, GuardrailAction, PolicyKind};

/// Which side of the conversation an assessment inspected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    /// The user's prompt
    Input,
    /// The model's response
    Output,
}

/// A guardrail trace: the verdict plus every assessment that led to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardrailTrace {
    pub action: GuardrailAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    /// In the order the platform reported them
    #[serde(default)]
    pub input_assessments: Vec<Assessment>,
    #[serde(default)]
    pub output_assessments: Vec<Assessment>,
}

impl GuardrailTrace {
    pub fn assessments(&self, side: Side) -> &[Assessment] {
        match side {
            Side::Input => &self.input_assessments,
            Side::Output => &self.output_assessments,
        }
    }

    /// Whether any assessment on `side` matched a rule of `policy`.
    pub fn matched(&self, side: Side, policy: PolicyKind) -> bool {
        self.assessments(side).iter().any(|a| a.has(policy))
    }
}

/// One trace event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceEvent {
    Guardrail(GuardrailTrace),
    /// Orchestration, pre/post-processing, failure and other traces
    Other { kind: String },
}

/// One recognized event from an invocation stream.
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationEvent {
    /// Raw response bytes. A UTF-8 sequence may be split across chunks.
    TextChunk(Vec<u8>),
    Trace(TraceEvent),
}

impl InvocationEvent {
    pub fn text(s: &str) -> Self {
        Self::TextChunk(s.as_bytes().to_vec())
    }
}

/// What a stream yields: a recognized event or something to skip.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    Event(InvocationEvent),
    /// An event variant this client does not understand
    Unrecognized { kind: String },
}

impl From<InvocationEvent> for StreamItem {
    fn from(event: InvocationEvent) -> Self {
        Self::Event(event)
    }
}
