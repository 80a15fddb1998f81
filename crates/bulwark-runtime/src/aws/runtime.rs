use async_trait::async_trait;
use aws_sdk_bedrockagentruntime::types::{
    GuardrailAssessment as TraceAssessment, GuardrailTrace as SdkGuardrailTrace, ResponseStream,
    StreamingConfigurations, Trace,
};
use aws_sdk_bedrockruntime::types::{
    GuardrailContentBlock, GuardrailContentQualifier, GuardrailContentSource, GuardrailOutputScope,
    GuardrailTextBlock,
};
use futures::stream::{self, StreamExt};

use bulwark_core::{
    Assessment, GroundingScore, GuardrailAction, GuardrailTrace, InvocationEvent, PolicyFinding,
    PolicyKind, StreamItem, TraceEvent,
};

use super::{classify, invalid, present, variant_name, AwsPlatform};
use crate::services::{
    AgentRuntime, ApplyGuardrailRequest, ApplyGuardrailResponse, EventStream, GroundingAssessment,
    InvokeAgentRequest, ServiceError,
};

/// Flatten one trace assessment into findings, keeping the payload verbatim.
fn assessment(raw: &TraceAssessment) -> Assessment {
    let mut findings = Vec::new();
    let action_of = |a: Option<&str>| a.unwrap_or_default().to_string();

    if let Some(topics) = present(raw.topic_policy()) {
        for topic in present(topics.topics()).unwrap_or_default() {
            findings.push(PolicyFinding::new(
                PolicyKind::Topic,
                present(topic.name()).unwrap_or_default(),
                action_of(present(topic.action()).map(|a| a.as_str())),
            ));
        }
    }

    if let Some(content) = present(raw.content_policy()) {
        for filter in present(content.filters()).unwrap_or_default() {
            findings.push(PolicyFinding::new(
                PolicyKind::ContentFilter,
                present(filter.r#type()).map(|t| t.as_str()).unwrap_or_default(),
                action_of(present(filter.action()).map(|a| a.as_str())),
            ));
        }
    }

    if let Some(words) = present(raw.word_policy()) {
        for word in present(words.custom_words()).unwrap_or_default() {
            findings.push(PolicyFinding::new(
                PolicyKind::CustomWord,
                present(word.r#match()).unwrap_or_default(),
                action_of(present(word.action()).map(|a| a.as_str())),
            ));
        }
        for word in present(words.managed_word_lists()).unwrap_or_default() {
            findings.push(PolicyFinding::new(
                PolicyKind::ManagedWord,
                present(word.r#match()).unwrap_or_default(),
                action_of(present(word.action()).map(|a| a.as_str())),
            ));
        }
    }

    if let Some(sensitive) = present(raw.sensitive_information_policy()) {
        for entity in present(sensitive.pii_entities()).unwrap_or_default() {
            findings.push(PolicyFinding::new(
                PolicyKind::PiiEntity,
                present(entity.r#type()).map(|t| t.as_str()).unwrap_or_default(),
                action_of(present(entity.action()).map(|a| a.as_str())),
            ));
        }
        for regex in present(sensitive.regexes()).unwrap_or_default() {
            findings.push(PolicyFinding::new(
                PolicyKind::Regex,
                present(regex.name()).unwrap_or_default(),
                action_of(present(regex.action()).map(|a| a.as_str())),
            ));
        }
    }

    Assessment {
        findings,
        detail: format!("{raw:?}"),
    }
}

fn guardrail_trace(raw: &SdkGuardrailTrace) -> GuardrailTrace {
    GuardrailTrace {
        action: present(raw.action())
            .map(|a| GuardrailAction::parse(a.as_str()))
            .unwrap_or(GuardrailAction::None),
        trace_id: present(raw.trace_id()).map(str::to_string),
        input_assessments: present(raw.input_assessments())
            .unwrap_or_default()
            .iter()
            .map(assessment)
            .collect(),
        output_assessments: present(raw.output_assessments())
            .unwrap_or_default()
            .iter()
            .map(assessment)
            .collect(),
    }
}

fn stream_item(event: ResponseStream) -> StreamItem {
    match event {
        ResponseStream::Chunk(part) => {
            let bytes = present(part.bytes())
                .map(|b| b.as_ref().to_vec())
                .unwrap_or_default();
            InvocationEvent::TextChunk(bytes).into()
        }
        ResponseStream::Trace(part) => match present(part.trace()) {
            Some(Trace::GuardrailTrace(trace)) => {
                InvocationEvent::Trace(TraceEvent::Guardrail(guardrail_trace(trace))).into()
            }
            Some(other) => InvocationEvent::Trace(TraceEvent::Other {
                kind: variant_name(other),
            })
            .into(),
            None => StreamItem::Unrecognized {
                kind: "EmptyTrace".to_string(),
            },
        },
        other => StreamItem::Unrecognized {
            kind: variant_name(&other),
        },
    }
}

#[async_trait]
impl AgentRuntime for AwsPlatform {
    async fn apply_guardrail(
        &self,
        request: ApplyGuardrailRequest,
    ) -> Result<ApplyGuardrailResponse, ServiceError> {
        const OP: &str = "ApplyGuardrail";

        let mut call = self
            .runtime
            .apply_guardrail()
            .guardrail_identifier(&request.guardrail_id)
            .guardrail_version(&request.guardrail_version)
            .source(GuardrailContentSource::from(request.source.as_str()))
            .output_scope(GuardrailOutputScope::from(request.output_scope.as_str()));
        for segment in &request.content {
            let block = GuardrailTextBlock::builder()
                .text(&segment.text)
                .qualifiers(GuardrailContentQualifier::from(segment.qualifier.as_str()))
                .build()
                .map_err(invalid(OP))?;
            call = call.content(GuardrailContentBlock::Text(block));
        }

        let output = call.send().await.map_err(|e| classify(OP, e))?;

        let action = present(output.action())
            .map(|a| GuardrailAction::parse(a.as_str()))
            .ok_or_else(|| ServiceError::malformed(OP, "response has no action"))?;

        let assessments = present(output.assessments())
            .unwrap_or_default()
            .iter()
            .map(|a| GroundingAssessment {
                grounding: present(a.contextual_grounding_policy()).map(|policy| {
                    present(policy.filters())
                        .unwrap_or_default()
                        .iter()
                        .map(|f| GroundingScore {
                            kind: present(f.r#type())
                                .map(|t| t.as_str())
                                .unwrap_or_default()
                                .to_string(),
                            score: Option::<f64>::from(f.score()).unwrap_or_default(),
                            threshold: Option::<f64>::from(f.threshold()).unwrap_or_default(),
                            action: present(f.action())
                                .map(|a| a.as_str())
                                .unwrap_or_default()
                                .to_string(),
                        })
                        .collect()
                }),
            })
            .collect();

        Ok(ApplyGuardrailResponse { action, assessments })
    }

    async fn invoke_agent(&self, request: InvokeAgentRequest) -> Result<EventStream, ServiceError> {
        const OP: &str = "InvokeAgent";

        let interval = i32::try_from(request.streaming.guardrail_interval).unwrap_or(i32::MAX);
        let streaming = StreamingConfigurations::builder()
            .apply_guardrail_interval(interval)
            .stream_final_response(request.streaming.stream_final_response)
            .build();

        let output = self
            .agent_runtime
            .invoke_agent()
            .agent_id(&request.agent_id)
            .agent_alias_id(&request.alias_id)
            .session_id(&request.session_id)
            .input_text(&request.prompt)
            .enable_trace(request.enable_trace)
            .streaming_configurations(streaming)
            .send()
            .await
            .map_err(|e| classify(OP, e))?;

        // A receive error ends the stream after it is yielded
        let events = stream::unfold(Some(output.completion), |receiver| async move {
            let mut receiver = receiver?;
            match receiver.recv().await {
                Ok(Some(event)) => Some((Ok(stream_item(event)), Some(receiver))),
                Ok(None) => None,
                Err(e) => Some((Err(classify(OP, e)), None)),
            }
        });

        Ok(events.boxed())
    }
}
