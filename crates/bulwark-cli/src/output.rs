//! Terminal output: streamed text on stdout, summaries after.

use std::io::{self, Write};
use tracing::debug;

use bulwark_core::{CreatedResources, GroundingKind, PolicyKind, Side, TraceEvent, Transcript};
use bulwark_runtime::{InvocationSink, LabeledOutcome};

/// Writes response text to stdout as it arrives.
pub struct StdoutSink {
    out: io::Stdout,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self { out: io::stdout() }
    }
}

impl InvocationSink for StdoutSink {
    fn on_text(&mut self, text: &str) {
        let mut out = self.out.lock();
        // A closed stdout is not worth aborting the stream for
        let _ = out.write_all(text.as_bytes());
        let _ = out.flush();
    }

    fn on_trace(&mut self, trace: &TraceEvent) {
        match trace {
            TraceEvent::Guardrail(g) => debug!(action = %g.action, "Guardrail trace"),
            TraceEvent::Other { kind } => debug!(kind = %kind, "Trace"),
        }
    }
}

/// Policies that matched on one side across all guardrail traces.
fn matched_policies(transcript: &Transcript, side: Side) -> Vec<&'static str> {
    let kinds = [
        PolicyKind::Topic,
        PolicyKind::ContentFilter,
        PolicyKind::CustomWord,
        PolicyKind::ManagedWord,
        PolicyKind::PiiEntity,
        PolicyKind::Regex,
    ];
    kinds
        .into_iter()
        .filter(|kind| {
            transcript
                .guardrail_traces
                .iter()
                .any(|t| t.matched(side, *kind))
        })
        .map(|kind| kind.as_str())
        .collect()
}

pub fn transcript_summary(transcript: &Transcript) -> Vec<String> {
    let mut lines = vec![
        format!("Session:          {}", transcript.session_id),
        format!("Guardrail action: {}", transcript.action()),
        format!("Guardrail traces: {}", transcript.guardrail_traces.len()),
    ];
    for (label, side) in [
        ("Input matches:", Side::Input),
        ("Output matches:", Side::Output),
    ] {
        let matched = matched_policies(transcript, side);
        if !matched.is_empty() {
            lines.push(format!("{label:<18}{}", matched.join(", ")));
        }
    }
    if transcript.skipped > 0 {
        lines.push(format!("Skipped events:   {}", transcript.skipped));
    }
    if transcript.cancelled {
        lines.push("Stream cancelled before completion".to_string());
    }
    lines
}

pub fn print_transcript(transcript: &Transcript) {
    // The streamed text has no trailing newline
    println!();
    println!();
    for line in transcript_summary(transcript) {
        println!("{line}");
    }
}

/// Resources a failed run left behind; there is no teardown.
pub fn print_leftovers(created: &CreatedResources) {
    if created.is_empty() {
        return;
    }
    eprintln!("Resources created before the failure (not deleted):");
    for entry in created.summary() {
        eprintln!("  {entry}");
    }
}

pub fn outcome_line(outcome: &LabeledOutcome) -> String {
    match &outcome.result {
        Ok(assessment) => {
            let threshold = |kind| {
                assessment
                    .filter(kind)
                    .map(|f| format!("{:.2}", f.threshold))
                    .unwrap_or_else(|| "-".to_string())
            };
            format!(
                "{:<14} {:<12} grounding {:.2} (threshold {})  relevance {:.2} (threshold {})",
                outcome.label,
                assessment.action.as_str(),
                assessment.grounding_score,
                threshold(GroundingKind::Grounding),
                assessment.relevance_score,
                threshold(GroundingKind::Relevance),
            )
        }
        Err(e) => format!("{:<14} ERROR        {e}", outcome.label),
    }
}
