//! # bulwark-core
//!
//! Deterministic domain model for guarded Bedrock agent pipelines.
//!
//! Nothing in this crate performs I/O against the platform. It answers:
//! - What does the guardrail block, mask and score?
//! - Which ARNs may the execution role touch, and who may assume it?
//! - What did a streamed invocation say, and did the guardrail step in?
//!
//! ## Example
//!
//! ```rust,ignore
//! use bulwark_core::{GuardrailPolicy, RolePolicies, RoleScope};
//!
//! let policy = GuardrailPolicy::from_file("guardrail.yaml")?;
//! let policies = RolePolicies::new(RoleScope {
//!     region: "us-east-1",
//!     account_id: "123456789012",
//!     foundation_model: "anthropic.claude-3-haiku-20240307-v1:0",
//!     guardrail_id: "a6w0gl4ttetz",
//! });
//! println!("{}", policies.permissions.to_json());
//! ```

pub mod arn;
pub mod config;
pub mod events;
pub mod guardrail;
pub mod naming;
pub mod policy;
pub mod resources;
pub mod status;
pub mod transcript;

// Re-export main types at crate root
pub use config::{ConfigError, PipelineConfig, PollingConfig, StreamingConfig};
pub use events::{GuardrailTrace, InvocationEvent, Side, StreamItem, TraceEvent};
pub use guardrail::{
    Assessment, AssessmentError, GroundingKind, GroundingScore, GuardrailAction,
    GuardrailAssessment, GuardrailPolicy, PolicyError, PolicyFinding, PolicyKind,
};
pub use policy::{PolicyDocument, RolePolicies, RoleScope};
pub use resources::{AgentHandle, AliasHandle, CreatedResources, ExecutionRole, GuardrailHandle};
pub use status::ResourceStatus;
pub use transcript::{Transcript, TranscriptBuilder};
