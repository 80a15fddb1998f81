//! # bulwark-runtime
//!
//! Drives a guarded Bedrock agent pipeline against a platform backend.
//!
//! The pipeline creates a guardrail, an execution role, an agent bound to
//! both, waits for the agent to be prepared, routes an alias to it and
//! streams one invocation while collecting guardrail traces. A separate
//! [`Evaluator`] runs contextual grounding checks against a guardrail.
//!
//! Platform calls go through the traits in [`services`]. Two backends exist:
//! - [`SimulatedPlatform`]: in-memory, deterministic, used by tests and dry runs
//! - `AwsPlatform` (feature `aws`): the official SDK clients
//!
//! No call is ever retried. The only waiting is readiness polling at a fixed
//! interval and the role propagation delay.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use bulwark_runtime::{NullSink, Pipeline, SimulatedPlatform, DEFAULT_PROMPT};
//!
//! let mut config = bulwark_core::PipelineConfig::default();
//! config.account_id = Some("123456789012".to_string());
//!
//! let pipeline = Pipeline::builder()
//!     .config(config)
//!     .platform(Arc::new(SimulatedPlatform::new()))
//!     .build()?;
//!
//! let report = pipeline.run(DEFAULT_PROMPT, &mut NullSink).await?;
//! println!("{} ({})", report.transcript.text, report.transcript.action());
//! ```

pub mod evaluator;
pub mod pipeline;
pub mod poller;
pub mod provisioner;
pub mod reader;
pub mod services;
pub mod simulated;

#[cfg(feature = "aws")]
pub mod aws;

// Re-export main types at crate root
pub use evaluator::{
    demo_checks, EvaluationError, Evaluator, GroundingCheck, LabeledCheck, LabeledOutcome,
};
pub use pipeline::{
    BuildError, Pipeline, PipelineBuilder, PipelineError, PipelineReport, ProvisionedAgent, Stage,
    StageError, DEFAULT_PROMPT,
};
pub use poller::{wait_until, PollSpec, Readiness, ReadinessError};
pub use provisioner::{Provisioner, ProvisioningError};
pub use reader::{AgentTarget, InvocationError, InvocationReader, InvocationSink, NullSink};
pub use services::{
    AgentControlPlane, AgentRuntime, EventStream, GuardrailService, IdentityService, ServiceError,
};
pub use simulated::SimulatedPlatform;

#[cfg(feature = "aws")]
pub use aws::AwsPlatform;
