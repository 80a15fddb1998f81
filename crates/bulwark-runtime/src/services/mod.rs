//! Service seams for the platform collaborators.
//!
//! The pipeline only talks to the platform through these traits. Two
//! implementations exist: [`crate::simulated::SimulatedPlatform`] and, with
//! the `aws` feature, [`crate::aws::AwsPlatform`].

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::time::Duration;
use thiserror::Error;

use bulwark_core::{
    AgentHandle, AliasHandle, ExecutionRole, GroundingScore, GuardrailAction, GuardrailHandle,
    GuardrailPolicy, ResourceStatus, StreamItem, StreamingConfig,
};

/// Errors from a platform call. Never retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    #[error("{operation} rejected: {message}")]
    Rejected {
        operation: &'static str,
        message: String,
    },

    #[error("Malformed {operation} response: {message}")]
    MalformedResponse {
        operation: &'static str,
        message: String,
    },

    #[error("Transport error during {operation}: {message}")]
    Transport {
        operation: &'static str,
        message: String,
    },

    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },
}

impl ServiceError {
    pub fn rejected(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Rejected {
            operation,
            message: message.into(),
        }
    }

    pub fn malformed(operation: &'static str, message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            operation,
            message: message.into(),
        }
    }

    pub fn transport(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Transport {
            operation,
            message: message.into(),
        }
    }
}

/// Stream of invocation events in delivery order.
pub type EventStream = BoxStream<'static, Result<StreamItem, ServiceError>>;

/// A resource tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateRoleRequest {
    pub name: String,
    pub description: String,
    /// Trust policy JSON
    pub assume_role_policy: String,
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PutRolePolicyRequest {
    pub role_name: String,
    pub policy_name: String,
    /// Permission policy JSON
    pub document: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateAgentRequest {
    pub name: String,
    pub foundation_model: String,
    pub instruction: String,
    pub role_arn: String,
    pub guardrail: GuardrailHandle,
    pub idle_session_ttl: Duration,
}

/// Current state of an agent or alias.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceState {
    pub status: ResourceStatus,
    /// Reported when the status is a failure
    pub failure_reasons: Vec<String>,
}

impl ResourceState {
    pub fn new(status: ResourceStatus) -> Self {
        Self {
            status,
            failure_reasons: Vec::new(),
        }
    }
}

/// An alias as reported by the control plane.
#[derive(Debug, Clone, PartialEq)]
pub struct AliasState {
    pub id: String,
    pub state: ResourceState,
    /// Agent version of the first routing entry, once routed
    pub agent_version: Option<String>,
}

impl AliasState {
    pub fn handle(&self) -> Option<AliasHandle> {
        self.agent_version.as_ref().map(|v| AliasHandle {
            id: self.id.clone(),
            agent_version: v.clone(),
        })
    }
}

/// Role a text segment plays in a contextual grounding check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qualifier {
    GroundingSource,
    Query,
    GuardContent,
}

impl Qualifier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GroundingSource => "grounding_source",
            Self::Query => "query",
            Self::GuardContent => "guard_content",
        }
    }
}

/// Which side of a conversation the content comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentSource {
    Input,
    Output,
}

impl ContentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "INPUT",
            Self::Output => "OUTPUT",
        }
    }
}

/// How much of the assessment the platform returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputScope {
    Interventions,
    Full,
}

impl OutputScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Interventions => "INTERVENTIONS",
            Self::Full => "FULL",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextSegment {
    pub text: String,
    pub qualifier: Qualifier,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApplyGuardrailRequest {
    pub guardrail_id: String,
    pub guardrail_version: String,
    pub source: ContentSource,
    pub output_scope: OutputScope,
    pub content: Vec<TextSegment>,
}

impl ApplyGuardrailRequest {
    pub fn segment(&self, qualifier: Qualifier) -> Option<&str> {
        self.content
            .iter()
            .find(|s| s.qualifier == qualifier)
            .map(|s| s.text.as_str())
    }
}

/// One assessment from an apply-guardrail response, reduced to what the
/// evaluator reads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroundingAssessment {
    /// `None` when the response has no contextual grounding section
    pub grounding: Option<Vec<GroundingScore>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApplyGuardrailResponse {
    pub action: GuardrailAction,
    pub assessments: Vec<GroundingAssessment>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvokeAgentRequest {
    pub agent_id: String,
    pub alias_id: String,
    pub session_id: String,
    pub prompt: String,
    pub enable_trace: bool,
    pub streaming: StreamingConfig,
}

/// Identity and access management.
#[async_trait]
pub trait IdentityService: Send + Sync {
    async fn create_role(&self, request: CreateRoleRequest) -> Result<ExecutionRole, ServiceError>;

    async fn put_role_policy(&self, request: PutRolePolicyRequest) -> Result<(), ServiceError>;
}

/// Guardrail management.
#[async_trait]
pub trait GuardrailService: Send + Sync {
    /// Create a guardrail named `name` from `policy`. The handle is at DRAFT.
    async fn create_guardrail(
        &self,
        name: &str,
        policy: &GuardrailPolicy,
    ) -> Result<GuardrailHandle, ServiceError>;
}

/// Agent lifecycle management.
#[async_trait]
pub trait AgentControlPlane: Send + Sync {
    async fn create_agent(&self, request: CreateAgentRequest) -> Result<AgentHandle, ServiceError>;

    /// Start preparation. Returns the status reported by the call.
    async fn prepare_agent(&self, agent_id: &str) -> Result<ResourceStatus, ServiceError>;

    async fn get_agent(&self, agent_id: &str) -> Result<ResourceState, ServiceError>;

    async fn create_agent_alias(
        &self,
        agent_id: &str,
        alias_name: &str,
    ) -> Result<AliasState, ServiceError>;

    async fn get_agent_alias(
        &self,
        agent_id: &str,
        alias_id: &str,
    ) -> Result<AliasState, ServiceError>;
}

/// Data-plane calls: guardrail checks and agent invocation.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    async fn apply_guardrail(
        &self,
        request: ApplyGuardrailRequest,
    ) -> Result<ApplyGuardrailResponse, ServiceError>;

    async fn invoke_agent(&self, request: InvokeAgentRequest) -> Result<EventStream, ServiceError>;
}
