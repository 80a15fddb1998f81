//! Streamed agent invocation.
//!
//! Drives one invocation and consumes its event stream exactly once, in
//! delivery order. Decoded text goes to the [`InvocationSink`] as soon as it
//! arrives; traces are handed over as typed events. Events this client does
//! not understand are logged and skipped.

use futures::StreamExt;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use bulwark_core::naming::session_id;
use bulwark_core::{
    AgentHandle, AliasHandle, InvocationEvent, StreamItem, StreamingConfig, TraceEvent,
    Transcript, TranscriptBuilder,
};

use crate::services::{AgentRuntime, InvokeAgentRequest, ServiceError};

/// Errors from an invocation.
#[derive(Error, Debug)]
pub enum InvocationError {
    #[error("InvokeAgent failed: {0}")]
    Start(#[source] ServiceError),

    #[error("Stream aborted after {events} events: {source}")]
    Stream {
        events: usize,
        #[source]
        source: ServiceError,
    },
}

/// Receives invocation output as it streams.
pub trait InvocationSink: Send {
    /// Decoded response text. Never splits a character.
    fn on_text(&mut self, _text: &str) {}

    fn on_trace(&mut self, _trace: &TraceEvent) {}
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl InvocationSink for NullSink {}

/// Agent and alias to invoke.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentTarget {
    pub agent_id: String,
    pub alias_id: String,
}

impl AgentTarget {
    pub fn new(agent_id: impl Into<String>, alias_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            alias_id: alias_id.into(),
        }
    }
}

impl From<(&AgentHandle, &AliasHandle)> for AgentTarget {
    fn from((agent, alias): (&AgentHandle, &AliasHandle)) -> Self {
        Self::new(agent.id.clone(), alias.id.clone())
    }
}

/// Invokes agents and reads their streams.
pub struct InvocationReader {
    runtime: Arc<dyn AgentRuntime>,
    streaming: StreamingConfig,
}

impl InvocationReader {
    pub fn new(runtime: Arc<dyn AgentRuntime>, streaming: StreamingConfig) -> Self {
        Self { runtime, streaming }
    }

    /// Invoke `target` with `prompt` under a fresh session.
    ///
    /// When `cancel` fires, consumption stops and the partial transcript is
    /// returned with `cancelled` set.
    #[instrument(skip_all, fields(agent = %target.agent_id, alias = %target.alias_id))]
    pub async fn invoke(
        &self,
        target: &AgentTarget,
        prompt: &str,
        sink: &mut dyn InvocationSink,
        cancel: Option<&CancellationToken>,
    ) -> Result<Transcript, InvocationError> {
        let session = session_id();
        info!(session_id = %session, "Invoking agent");

        let mut stream = self
            .runtime
            .invoke_agent(InvokeAgentRequest {
                agent_id: target.agent_id.clone(),
                alias_id: target.alias_id.clone(),
                session_id: session.clone(),
                prompt: prompt.to_string(),
                enable_trace: true,
                streaming: self.streaming.clone(),
            })
            .await
            .map_err(InvocationError::Start)?;

        let mut transcript = TranscriptBuilder::new(session);
        let mut events = 0usize;

        loop {
            let next = match cancel {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        info!(events, "Invocation cancelled");
                        transcript.mark_cancelled();
                        break;
                    }
                    item = stream.next() => item,
                },
                None => stream.next().await,
            };

            let Some(item) = next else { break };
            let item = item.map_err(|source| InvocationError::Stream { events, source })?;
            events += 1;

            match item {
                StreamItem::Event(InvocationEvent::TextChunk(bytes)) => {
                    let text = transcript.push_chunk(&bytes);
                    if !text.is_empty() {
                        sink.on_text(&text);
                    }
                }
                StreamItem::Event(InvocationEvent::Trace(trace)) => {
                    match &trace {
                        TraceEvent::Guardrail(g) => info!(
                            action = %g.action,
                            input_assessments = g.input_assessments.len(),
                            output_assessments = g.output_assessments.len(),
                            "Guardrail trace"
                        ),
                        TraceEvent::Other { kind } => debug!(kind = %kind, "Trace"),
                    }
                    sink.on_trace(&trace);
                    transcript.push_trace(trace);
                }
                StreamItem::Unrecognized { kind } => {
                    warn!(kind = %kind, "Skipping unrecognized stream event");
                    transcript.record_skipped();
                }
            }
        }

        let rest = transcript.flush();
        if !rest.is_empty() {
            sink.on_text(&rest);
        }

        let transcript = transcript.finish();
        info!(
            chars = transcript.text.chars().count(),
            action = %transcript.action(),
            skipped = transcript.skipped,
            "Invocation finished"
        );
        Ok(transcript)
    }
}
