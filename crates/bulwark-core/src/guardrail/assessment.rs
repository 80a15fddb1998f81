//! Guardrail verdicts and policy findings.
//!
//! The platform reports findings per policy family. Grounding results are
//! looked up by their kind tag: the order of filters in a response is not
//! part of the contract.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::policy::GroundingKind;

/// Overall guardrail verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum GuardrailAction {
    /// Content passed untouched
    None,
    /// The guardrail blocked or masked content
    Intervened,
    Other(String),
}

impl GuardrailAction {
    /// Accepts both the runtime spelling (`GUARDRAIL_INTERVENED`) and the
    /// agent trace spelling (`INTERVENED`).
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "NONE" => Self::None,
            "INTERVENED" | "GUARDRAIL_INTERVENED" => Self::Intervened,
            _ => Self::Other(raw.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::None => "NONE",
            Self::Intervened => "INTERVENED",
            Self::Other(s) => s,
        }
    }

    pub fn intervened(&self) -> bool {
        matches!(self, Self::Intervened)
    }
}

impl fmt::Display for GuardrailAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for GuardrailAction {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<GuardrailAction> for String {
    fn from(value: GuardrailAction) -> Self {
        value.as_str().to_string()
    }
}

/// Policy family a finding belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    Topic,
    ContentFilter,
    CustomWord,
    ManagedWord,
    PiiEntity,
    Regex,
    Grounding,
}

impl PolicyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Topic => "topic",
            Self::ContentFilter => "content_filter",
            Self::CustomWord => "custom_word",
            Self::ManagedWord => "managed_word",
            Self::PiiEntity => "pii_entity",
            Self::Regex => "regex",
            Self::Grounding => "grounding",
        }
    }
}

/// One matched rule inside an assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyFinding {
    pub policy: PolicyKind,
    /// Topic name, filter type, matched word, entity type or regex name
    pub name: String,
    /// Platform action, e.g. `BLOCKED`, `ANONYMIZED`
    pub action: String,
}

impl PolicyFinding {
    pub fn new(policy: PolicyKind, name: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            policy,
            name: name.into(),
            action: action.into(),
        }
    }
}

/// One assessment from a guardrail trace.
///
/// `detail` holds the platform's payload verbatim; `findings` is the typed
/// view of the same data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub findings: Vec<PolicyFinding>,
    pub detail: String,
}

impl Assessment {
    pub fn findings_for(&self, policy: PolicyKind) -> impl Iterator<Item = &PolicyFinding> {
        self.findings.iter().filter(move |f| f.policy == policy)
    }

    pub fn has(&self, policy: PolicyKind) -> bool {
        self.findings_for(policy).next().is_some()
    }
}

/// One contextual grounding filter result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundingScore {
    /// Raw kind tag from the platform
    pub kind: String,
    pub score: f64,
    pub threshold: f64,
    pub action: String,
}

impl GroundingScore {
    pub fn kind(&self) -> Option<GroundingKind> {
        GroundingKind::parse(&self.kind)
    }

    pub fn passed(&self) -> bool {
        self.score >= self.threshold
    }
}

/// Errors assembling an evaluation verdict.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AssessmentError {
    #[error("Response has no contextual grounding assessment")]
    MissingGrounding,

    #[error("Response has no {0} filter result")]
    MissingFilter(&'static str),

    #[error("Score {score} for {kind} is outside [0, 1]")]
    ScoreOutOfRange { kind: &'static str, score: f64 },
}

/// Verdict of one contextual grounding check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardrailAssessment {
    pub action: GuardrailAction,
    pub grounding_score: f64,
    pub relevance_score: f64,
    pub filters: Vec<GroundingScore>,
}

impl GuardrailAssessment {
    /// Build a verdict, locating each filter by its kind tag.
    pub fn from_filters(
        action: GuardrailAction,
        filters: Vec<GroundingScore>,
    ) -> Result<Self, AssessmentError> {
        if filters.is_empty() {
            return Err(AssessmentError::MissingGrounding);
        }

        let score_of = |kind: GroundingKind| -> Result<f64, AssessmentError> {
            let score = filters
                .iter()
                .find(|f| f.kind() == Some(kind))
                .map(|f| f.score)
                .ok_or(AssessmentError::MissingFilter(kind.as_str()))?;
            if !(0.0..=1.0).contains(&score) {
                return Err(AssessmentError::ScoreOutOfRange {
                    kind: kind.as_str(),
                    score,
                });
            }
            Ok(score)
        };

        let grounding_score = score_of(GroundingKind::Grounding)?;
        let relevance_score = score_of(GroundingKind::Relevance)?;

        Ok(Self {
            action,
            grounding_score,
            relevance_score,
            filters,
        })
    }

    pub fn filter(&self, kind: GroundingKind) -> Option<&GroundingScore> {
        self.filters.iter().find(|f| f.kind() == Some(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(kind: &str, score: f64) -> GroundingScore {
        GroundingScore {
            kind: kind.to_string(),
            score,
            threshold: 0.5,
            action: "NONE".to_string(),
        }
    }

    #[test]
    fn test_action_spellings() {
        assert_eq!(GuardrailAction::parse("NONE"), GuardrailAction::None);
        assert_eq!(GuardrailAction::parse("INTERVENED"), GuardrailAction::Intervened);
        assert_eq!(
            GuardrailAction::parse("GUARDRAIL_INTERVENED"),
            GuardrailAction::Intervened
        );
        assert!(matches!(GuardrailAction::parse("MAYBE"), GuardrailAction::Other(_)));
    }

    #[test]
    fn test_filters_found_by_kind_not_position() {
        let assessment = GuardrailAssessment::from_filters(
            GuardrailAction::None,
            vec![score("RELEVANCE", 0.91), score("GROUNDING", 0.12)],
        )
        .unwrap();

        assert_eq!(assessment.grounding_score, 0.12);
        assert_eq!(assessment.relevance_score, 0.91);
        assert!(!assessment.filter(GroundingKind::Grounding).unwrap().passed());
    }

    #[test]
    fn test_missing_kind_is_error() {
        let result = GuardrailAssessment::from_filters(
            GuardrailAction::None,
            vec![score("GROUNDING", 0.9)],
        );
        assert_eq!(result, Err(AssessmentError::MissingFilter("RELEVANCE")));
    }

    #[test]
    fn test_empty_filters_is_error() {
        let result = GuardrailAssessment::from_filters(GuardrailAction::None, vec![]);
        assert_eq!(result, Err(AssessmentError::MissingGrounding));
    }

    #[test]
    fn test_score_out_of_range() {
        let result = GuardrailAssessment::from_filters(
            GuardrailAction::None,
            vec![score("GROUNDING", 1.4), score("RELEVANCE", 0.2)],
        );
        assert!(matches!(result, Err(AssessmentError::ScoreOutOfRange { .. })));
    }

    #[test]
    fn test_assessment_filters_by_policy() {
        let assessment = Assessment {
            findings: vec![
                PolicyFinding::new(PolicyKind::Topic, "Heavy metal", "BLOCKED"),
                PolicyFinding::new(PolicyKind::CustomWord, "metal", "BLOCKED"),
            ],
            detail: String::new(),
        };
        assert!(assessment.has(PolicyKind::Topic));
        assert!(!assessment.has(PolicyKind::PiiEntity));
        assert_eq!(assessment.findings_for(PolicyKind::CustomWord).count(), 1);
    }
}
