//! Contextual grounding evaluation.
//!
//! Submits an answer together with its grounding source and the user's
//! query to a guardrail and reads back the grounding and relevance scores.
//! Whether a low score blocks is up to the guardrail's own thresholds; the
//! returned action is reported as the platform gave it.

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};

use bulwark_core::{AssessmentError, GuardrailAssessment, GuardrailHandle};

use crate::services::{
    AgentRuntime, ApplyGuardrailRequest, ContentSource, OutputScope, Qualifier, ServiceError,
    TextSegment,
};

/// Errors from one evaluation. Fatal for that call only.
#[derive(Error, Debug)]
pub enum EvaluationError {
    #[error("ApplyGuardrail failed: {0}")]
    Service(#[from] ServiceError),

    #[error("Response contains no assessment")]
    MissingAssessment,

    #[error(transparent)]
    Assessment(#[from] AssessmentError),
}

/// One answer to check against its grounding source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroundingCheck {
    pub source: String,
    pub query: String,
    pub answer: String,
}

impl GroundingCheck {
    pub fn new(
        source: impl Into<String>,
        query: impl Into<String>,
        answer: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            query: query.into(),
            answer: answer.into(),
        }
    }
}

/// A named check in a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabeledCheck {
    pub label: String,
    pub check: GroundingCheck,
}

/// Outcome of one check in a batch.
#[derive(Debug)]
pub struct LabeledOutcome {
    pub label: String,
    pub answer: String,
    pub result: Result<GuardrailAssessment, EvaluationError>,
}

const DEMO_SOURCE: &str = "Paris is the capital of France.\nBerlin is the capital of Germany.\n";
const DEMO_QUERY: &str = "What is the capital of Germany?";

/// A grounded answer and a hallucinated one for the same question.
pub fn demo_checks() -> Vec<LabeledCheck> {
    [
        ("grounded", "Berlin is the capital of Germany."),
        ("hallucinated", "The capital of Germany is Munich."),
    ]
    .into_iter()
    .map(|(label, answer)| LabeledCheck {
        label: label.to_string(),
        check: GroundingCheck::new(DEMO_SOURCE, DEMO_QUERY, answer),
    })
    .collect()
}

/// Runs grounding checks against one guardrail.
pub struct Evaluator {
    runtime: Arc<dyn AgentRuntime>,
    guardrail: GuardrailHandle,
}

impl Evaluator {
    pub fn new(runtime: Arc<dyn AgentRuntime>, guardrail: GuardrailHandle) -> Self {
        Self { runtime, guardrail }
    }

    fn request(&self, check: &GroundingCheck) -> ApplyGuardrailRequest {
        let segment = |text: &str, qualifier| TextSegment {
            text: text.to_string(),
            qualifier,
        };
        ApplyGuardrailRequest {
            guardrail_id: self.guardrail.id.clone(),
            guardrail_version: self.guardrail.version.clone(),
            source: ContentSource::Output,
            output_scope: OutputScope::Full,
            content: vec![
                segment(&check.source, Qualifier::GroundingSource),
                segment(&check.query, Qualifier::Query),
                segment(&check.answer, Qualifier::GuardContent),
            ],
        }
    }

    /// Score one answer.
    #[instrument(skip_all, fields(guardrail = %self.guardrail.id))]
    pub async fn evaluate(
        &self,
        check: &GroundingCheck,
    ) -> Result<GuardrailAssessment, EvaluationError> {
        let response = self.runtime.apply_guardrail(self.request(check)).await?;

        if response.assessments.is_empty() {
            return Err(EvaluationError::MissingAssessment);
        }
        // The grounding section may sit in any assessment
        let filters = response
            .assessments
            .into_iter()
            .find_map(|a| a.grounding)
            .ok_or(AssessmentError::MissingGrounding)?;
        let assessment = GuardrailAssessment::from_filters(response.action, filters)?;

        info!(
            action = %assessment.action,
            grounding = assessment.grounding_score,
            relevance = assessment.relevance_score,
            "Grounding check"
        );
        Ok(assessment)
    }

    /// Score every check in order. A failed check does not stop the batch.
    pub async fn evaluate_all(&self, checks: &[LabeledCheck]) -> Vec<LabeledOutcome> {
        let mut outcomes = Vec::with_capacity(checks.len());
        for labeled in checks {
            let result = self.evaluate(&labeled.check).await;
            if let Err(e) = &result {
                warn!(label = %labeled.label, error = %e, "Grounding check failed");
            }
            outcomes.push(LabeledOutcome {
                label: labeled.label.clone(),
                answer: labeled.check.answer.clone(),
                result,
            });
        }
        outcomes
    }
}
