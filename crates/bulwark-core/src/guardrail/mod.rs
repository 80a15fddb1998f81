//! Guardrail policy bundles and the verdicts a guardrail produces.

pub mod assessment;
pub mod policy;
pub mod schema;

pub use assessment::{
    Assessment, AssessmentError, GroundingScore, GuardrailAction, GuardrailAssessment,
    PolicyFinding, PolicyKind,
};
pub use policy::{
    ContentFilter, ContentFilterKind, DeniedTopic, DirectionalAction, FilterStrength,
    GroundingFilter, GroundingKind, GuardrailPolicy, ManagedListKind, ManagedWordList, Modality,
    PiiRule, PolicyError, RegexRule, RuleAction, WordRule,
};
pub use schema::{validate_policy_schema, SchemaError};
