//! Assembly of a streamed invocation into a transcript.
//!
//! [`TranscriptBuilder`] consumes events in delivery order. Text chunks are
//! decoded incrementally: a multi-byte character split across two chunks is
//! held back until its remaining bytes arrive, so every decoded fragment is
//! valid UTF-8 and can be shown immediately.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::events::{GuardrailTrace, InvocationEvent, TraceEvent};
use crate::guardrail::GuardrailAction;

/// Incremental UTF-8 decoder.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Decode as much of `pending + bytes` as forms complete characters.
    fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(s) => {
                    out.push_str(s);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    // Prefix is valid by construction
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        // Truncated sequence at the end: wait for more bytes
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                        Some(len) => {
                            warn!(bytes = len, "Invalid UTF-8 in response chunk, replacing");
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                    }
                }
            }
        }
    }

    /// Flush whatever is left at end of stream.
    fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

/// Everything one invocation produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub session_id: String,
    pub text: String,
    pub guardrail_traces: Vec<GuardrailTrace>,
    /// Kind names of non-guardrail traces, in delivery order
    pub other_traces: Vec<String>,
    /// Events skipped because they were not understood
    pub skipped: usize,
    /// Consumption stopped before the stream ended
    pub cancelled: bool,
}

impl Transcript {
    /// Overall guardrail verdict: `INTERVENED` if any trace intervened,
    /// otherwise the last reported action, `NONE` if there were no traces.
    pub fn action(&self) -> GuardrailAction {
        if self.intervened() {
            return GuardrailAction::Intervened;
        }
        self.guardrail_traces
            .last()
            .map(|t| t.action.clone())
            .unwrap_or(GuardrailAction::None)
    }

    pub fn intervened(&self) -> bool {
        self.guardrail_traces.iter().any(|t| t.action.intervened())
    }

    /// Rebuild a transcript from a recorded event sequence.
    pub fn replay<I>(session_id: impl Into<String>, events: I) -> Self
    where
        I: IntoIterator<Item = InvocationEvent>,
    {
        let mut builder = TranscriptBuilder::new(session_id);
        for event in events {
            builder.apply(event);
        }
        builder.finish()
    }
}

/// Accumulates events into a [`Transcript`].
#[derive(Debug)]
pub struct TranscriptBuilder {
    session_id: String,
    decoder: Utf8Decoder,
    text: String,
    guardrail_traces: Vec<GuardrailTrace>,
    other_traces: Vec<String>,
    skipped: usize,
    cancelled: bool,
}

impl TranscriptBuilder {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            decoder: Utf8Decoder::default(),
            text: String::new(),
            guardrail_traces: Vec::new(),
            other_traces: Vec::new(),
            skipped: 0,
            cancelled: false,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Add response bytes; returns the newly decoded text (possibly empty).
    pub fn push_chunk(&mut self, bytes: &[u8]) -> String {
        let fragment = self.decoder.push(bytes);
        self.text.push_str(&fragment);
        fragment
    }

    pub fn push_trace(&mut self, trace: TraceEvent) {
        match trace {
            TraceEvent::Guardrail(g) => self.guardrail_traces.push(g),
            TraceEvent::Other { kind } => self.other_traces.push(kind),
        }
    }

    /// Apply one event; returns decoded text for text chunks.
    pub fn apply(&mut self, event: InvocationEvent) -> Option<String> {
        match event {
            InvocationEvent::TextChunk(bytes) => Some(self.push_chunk(&bytes)),
            InvocationEvent::Trace(trace) => {
                self.push_trace(trace);
                None
            }
        }
    }

    pub fn record_skipped(&mut self) {
        self.skipped += 1;
    }

    pub fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    /// Decode any bytes still held back; returns the flushed text.
    ///
    /// Call at end of stream. Incomplete sequences become U+FFFD.
    pub fn flush(&mut self) -> String {
        let rest = self.decoder.finish();
        self.text.push_str(&rest);
        rest
    }

    pub fn finish(mut self) -> Transcript {
        self.flush();

        Transcript {
            session_id: self.session_id,
            text: self.text,
            guardrail_traces: self.guardrail_traces,
            other_traces: self.other_traces,
            skipped: self.skipped,
            cancelled: self.cancelled,
        }
    }
}
