//! End-to-end pipeline: guardrail, role, agent, prepare, alias, invoke.
//!
//! Stages run strictly in sequence, each consuming the identifiers the
//! previous one produced. The first failure stops the run; whatever was
//! created up to that point is reported in the error and left in place.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use bulwark_core::{
    AgentHandle, AliasHandle, ConfigError, CreatedResources, ExecutionRole, GuardrailHandle,
    GuardrailPolicy, PipelineConfig, PolicyError, Transcript,
};

use crate::poller::Readiness;
use crate::provisioner::{Provisioner, ProvisioningError};
use crate::reader::{AgentTarget, InvocationError, InvocationReader, InvocationSink};
use crate::services::{AgentControlPlane, AgentRuntime, GuardrailService, IdentityService};

/// Prompt used when none is given.
pub const DEFAULT_PROMPT: &str = "what type of music do you like?";

/// Pipeline stage, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Guardrail,
    Role,
    Agent,
    Prepare,
    Alias,
    Invoke,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Guardrail => "guardrail",
            Self::Role => "role",
            Self::Agent => "agent",
            Self::Prepare => "prepare",
            Self::Alias => "alias",
            Self::Invoke => "invoke",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cause of a stage failure.
#[derive(Error, Debug)]
pub enum StageError {
    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),

    #[error(transparent)]
    Invocation(#[from] InvocationError),
}

/// A failed run.
#[derive(Error, Debug)]
#[error("Pipeline stopped at {stage} stage: {source}")]
pub struct PipelineError {
    pub stage: Stage,
    /// Resources created before the failure, left in place
    pub created: Box<CreatedResources>,
    #[source]
    pub source: StageError,
}

/// Errors from assembling a pipeline.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("No {0} service configured")]
    MissingService(&'static str),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid guardrail policy: {0}")]
    Policy(#[from] PolicyError),
}

/// A prepared agent reachable through an alias.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProvisionedAgent {
    pub guardrail: GuardrailHandle,
    pub role: ExecutionRole,
    pub agent: AgentHandle,
    pub alias: AliasHandle,
    pub agent_readiness: Readiness,
}

impl ProvisionedAgent {
    pub fn target(&self) -> AgentTarget {
        AgentTarget::from((&self.agent, &self.alias))
    }

    pub fn created(&self) -> CreatedResources {
        CreatedResources {
            guardrail: Some(self.guardrail.clone()),
            role: Some(self.role.clone()),
            agent: Some(self.agent.clone()),
            alias: Some(self.alias.clone()),
        }
    }
}

/// A completed run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub provisioned: ProvisionedAgent,
    pub prompt: String,
    pub transcript: Transcript,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// The full guarded-agent pipeline.
pub struct Pipeline {
    provisioner: Provisioner,
    reader: InvocationReader,
    policy: GuardrailPolicy,
    cancel: Option<CancellationToken>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Provision everything up to a prepared alias.
    pub async fn provision(&self) -> Result<ProvisionedAgent, PipelineError> {
        let mut created = CreatedResources::default();

        let guardrail = stage(
            Stage::Guardrail,
            &created,
            self.provisioner.create_guardrail(&self.policy).await,
        )?;
        created.guardrail = Some(guardrail.clone());

        let role = stage(
            Stage::Role,
            &created,
            self.provisioner.create_role(&guardrail).await,
        )?;
        created.role = Some(role.clone());

        let agent = stage(
            Stage::Agent,
            &created,
            self.provisioner.create_agent(&role, &guardrail).await,
        )?;
        created.agent = Some(agent.clone());

        let agent_readiness = stage(
            Stage::Prepare,
            &created,
            self.provisioner.prepare_agent(&agent).await,
        )?;

        let alias = stage(
            Stage::Alias,
            &created,
            self.provisioner.create_alias(&agent).await,
        )?;

        info!(
            guardrail = %guardrail.id,
            agent = %agent.id,
            alias = %alias.id,
            "Provisioning complete"
        );
        Ok(ProvisionedAgent {
            guardrail,
            role,
            agent,
            alias,
            agent_readiness,
        })
    }

    /// Provision, then invoke the agent once with `prompt`.
    pub async fn run(
        &self,
        prompt: &str,
        sink: &mut dyn InvocationSink,
    ) -> Result<PipelineReport, PipelineError> {
        let started_at = Utc::now();
        let provisioned = self.provision().await?;

        let transcript = stage(
            Stage::Invoke,
            &provisioned.created(),
            self.reader
                .invoke(&provisioned.target(), prompt, sink, self.cancel.as_ref())
                .await,
        )?;

        Ok(PipelineReport {
            provisioned,
            prompt: prompt.to_string(),
            transcript,
            started_at,
            finished_at: Utc::now(),
        })
    }
}

/// Attach stage and created resources to a stage failure.
fn stage<T, E>(
    stage: Stage,
    created: &CreatedResources,
    result: Result<T, E>,
) -> Result<T, PipelineError>
where
    E: Into<StageError>,
{
    result.map_err(|e| {
        let err = PipelineError {
            stage,
            created: Box::new(created.clone()),
            source: e.into(),
        };
        error!(
            stage = %stage,
            created = ?created.summary(),
            error = %err.source,
            "Pipeline stage failed"
        );
        err
    })
}

/// Builder for [`Pipeline`].
pub struct PipelineBuilder {
    config: PipelineConfig,
    policy: GuardrailPolicy,
    identity: Option<Arc<dyn IdentityService>>,
    guardrails: Option<Arc<dyn GuardrailService>>,
    agents: Option<Arc<dyn AgentControlPlane>>,
    runtime: Option<Arc<dyn AgentRuntime>>,
    cancel: Option<CancellationToken>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
            policy: GuardrailPolicy::default(),
            identity: None,
            guardrails: None,
            agents: None,
            runtime: None,
            cancel: None,
        }
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Guardrail policy to provision. Defaults to the demo bundle.
    pub fn policy(mut self, policy: GuardrailPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn identity(mut self, identity: Arc<dyn IdentityService>) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn guardrails(mut self, guardrails: Arc<dyn GuardrailService>) -> Self {
        self.guardrails = Some(guardrails);
        self
    }

    pub fn control_plane(mut self, agents: Arc<dyn AgentControlPlane>) -> Self {
        self.agents = Some(agents);
        self
    }

    pub fn runtime(mut self, runtime: Arc<dyn AgentRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Use one platform for every service.
    pub fn platform<P>(self, platform: Arc<P>) -> Self
    where
        P: IdentityService + GuardrailService + AgentControlPlane + AgentRuntime + 'static,
    {
        self.identity(platform.clone())
            .guardrails(platform.clone())
            .control_plane(platform.clone())
            .runtime(platform)
    }

    /// Stop stream consumption when this token is cancelled.
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Validate configuration and policy, then build.
    pub fn build(self) -> Result<Pipeline, BuildError> {
        self.config.validate()?;
        self.policy.validate()?;

        let identity = self.identity.ok_or(BuildError::MissingService("identity"))?;
        let guardrails = self.guardrails.ok_or(BuildError::MissingService("guardrail"))?;
        let agents = self.agents.ok_or(BuildError::MissingService("agent control plane"))?;
        let runtime = self.runtime.ok_or(BuildError::MissingService("agent runtime"))?;

        let reader = InvocationReader::new(runtime, self.config.streaming.clone());
        let provisioner = Provisioner::new(identity, guardrails, agents, self.config);

        Ok(Pipeline {
            provisioner,
            reader,
            policy: self.policy,
            cancel: self.cancel,
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poller::ReadinessError;
    use crate::reader::NullSink;
    use crate::simulated::{Call, SimulatedPlatform};
    use bulwark_core::{GuardrailAction, PolicyKind, ResourceStatus, Side};

    fn config() -> PipelineConfig {
        PipelineConfig {
            account_id: Some("123456789012".to_string()),
            ..PipelineConfig::default()
        }
    }

    fn pipeline(platform: Arc<SimulatedPlatform>) -> Pipeline {
        Pipeline::builder()
            .config(config())
            .platform(platform)
            .build()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_denied_topic_intervenes_on_input() {
        let platform = Arc::new(SimulatedPlatform::new());
        let report = pipeline(platform.clone())
            .run("Can you make me a heavy metal playlist?", &mut NullSink)
            .await
            .unwrap();

        let transcript = &report.transcript;
        assert_eq!(transcript.action(), GuardrailAction::Intervened);
        let trace = &transcript.guardrail_traces[0];
        assert!(trace.matched(Side::Input, PolicyKind::Topic));
        assert!(trace.assessments(Side::Output).is_empty());
        assert_eq!(
            transcript.text,
            GuardrailPolicy::default().blocked_input_message
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_denied_topic_in_reply_intervenes_on_output() {
        let platform = Arc::new(
            SimulatedPlatform::new().with_reply("Heavy metal is my favourite. Try Iron Maiden!"),
        );
        let report = pipeline(platform)
            .run(DEFAULT_PROMPT, &mut NullSink)
            .await
            .unwrap();

        let transcript = &report.transcript;
        assert_eq!(transcript.action(), GuardrailAction::Intervened);
        assert!(transcript
            .guardrail_traces
            .iter()
            .any(|t| t.matched(Side::Output, PolicyKind::Topic)));
        assert!(!transcript
            .guardrail_traces
            .iter()
            .any(|t| t.matched(Side::Input, PolicyKind::Topic)));
        assert_eq!(
            transcript.text,
            GuardrailPolicy::default().blocked_output_message
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_clean_prompt_streams_reply() {
        let platform = Arc::new(SimulatedPlatform::new());
        let report = pipeline(platform.clone())
            .run(DEFAULT_PROMPT, &mut NullSink)
            .await
            .unwrap();

        assert_eq!(report.transcript.action(), GuardrailAction::None);
        assert_eq!(report.transcript.text, crate::simulated::DEFAULT_REPLY);
        assert_eq!(report.transcript.other_traces, vec!["OrchestrationTrace"]);
        assert_eq!(report.provisioned.alias.agent_version, "1");
        assert!(report.finished_at >= report.started_at);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_order() {
        let platform = Arc::new(SimulatedPlatform::new());
        pipeline(platform.clone()).provision().await.unwrap();

        let calls = platform.calls();
        let position = |pred: fn(&Call) -> bool| calls.iter().position(pred).unwrap();
        let guardrail = position(|c| matches!(c, Call::CreateGuardrail { .. }));
        let role = position(|c| matches!(c, Call::CreateRole { .. }));
        let agent = position(|c| matches!(c, Call::CreateAgent { .. }));
        let prepare = position(|c| matches!(c, Call::PrepareAgent { .. }));
        let alias = position(|c| matches!(c, Call::CreateAgentAlias { .. }));
        assert!(guardrail < role && role < agent && agent < prepare && prepare < alias);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_reports_created_resources() {
        let platform = Arc::new(
            SimulatedPlatform::new().with_agent_statuses(&[ResourceStatus::Failed]),
        );
        let err = pipeline(platform.clone()).provision().await.unwrap_err();

        assert_eq!(err.stage, Stage::Prepare);
        assert!(err.created.guardrail.is_some());
        assert!(err.created.role.is_some());
        assert!(err.created.agent.is_some());
        assert!(err.created.alias.is_none());
        assert!(matches!(
            err.source,
            StageError::Provisioning(ProvisioningError::Readiness(ReadinessError::Failed { .. }))
        ));
        assert!(!platform
            .calls()
            .iter()
            .any(|c| matches!(c, Call::CreateAgentAlias { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_alias_failure_stops_at_alias_stage() {
        let platform = Arc::new(
            SimulatedPlatform::new()
                .with_alias_statuses(&[ResourceStatus::Creating, ResourceStatus::Failed]),
        );
        let err = pipeline(platform.clone()).provision().await.unwrap_err();

        assert_eq!(err.stage, Stage::Alias);
        assert!(err.created.agent.is_some());
        assert!(err.created.alias.is_none());
        match err.source {
            StageError::Provisioning(ProvisioningError::Readiness(ReadinessError::Failed {
                attempts,
                status,
                ..
            })) => {
                assert_eq!(attempts, 2);
                assert_eq!(status, ResourceStatus::Failed);
            }
            other => panic!("expected alias readiness failure, got {other:?}"),
        }
        assert!(!platform
            .calls()
            .iter()
            .any(|c| matches!(c, Call::InvokeAgent { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_run_fails_at_role() {
        let platform = Arc::new(SimulatedPlatform::new());
        let pipeline = pipeline(platform.clone());
        pipeline.provision().await.unwrap();

        let err = pipeline.provision().await.unwrap_err();
        assert_eq!(err.stage, Stage::Role);
        assert!(err.created.guardrail.is_some());
        assert!(err.created.role.is_none());
    }

    #[test]
    fn test_build_requires_account_and_services() {
        let err = Pipeline::builder()
            .platform(Arc::new(SimulatedPlatform::new()))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, BuildError::Config(ConfigError::MissingAccountId)));

        let err = Pipeline::builder().config(config()).build().err().unwrap();
        assert!(matches!(err, BuildError::MissingService("identity")));
    }
}
