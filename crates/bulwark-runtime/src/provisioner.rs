//! Resource provisioning.
//!
//! One operation per resource. Each call is made once; a failure is
//! reported with the operation that failed and nothing is retried or
//! rolled back.

use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument};

use bulwark_core::naming::{unique_name, AGENT_SUFFIX_LEN, GUARDRAIL_SUFFIX_LEN};
use bulwark_core::{
    AgentHandle, AliasHandle, ConfigError, ExecutionRole, GuardrailHandle, GuardrailPolicy,
    PipelineConfig, PolicyError, RolePolicies, RoleScope,
};

use crate::poller::{wait_until, PollSpec, Readiness, ReadinessError};
use crate::services::{
    AgentControlPlane, AliasState, CreateAgentRequest, CreateRoleRequest, GuardrailService,
    IdentityService, PutRolePolicyRequest, ServiceError, Tag,
};

/// Tag applied to every role bulwark creates.
pub const CREATED_BY_TAG: (&str, &str) = ("CreatedBy", "bulwark");

const ROLE_DESCRIPTION: &str = "Executes Amazon Bedrock agents with guardrails applied";

/// Errors from provisioning a resource.
#[derive(Error, Debug)]
pub enum ProvisioningError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Guardrail policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("{operation} failed: {source}")]
    Service {
        operation: &'static str,
        #[source]
        source: ServiceError,
    },

    #[error(transparent)]
    Readiness(#[from] ReadinessError),

    #[error("Alias {alias_id} is PREPARED but routes to no agent version")]
    UnroutedAlias { alias_id: String },
}

fn service(operation: &'static str) -> impl FnOnce(ServiceError) -> ProvisioningError {
    move |source| ProvisioningError::Service { operation, source }
}

/// Creates the guardrail, role, agent and alias.
pub struct Provisioner {
    identity: Arc<dyn IdentityService>,
    guardrails: Arc<dyn GuardrailService>,
    agents: Arc<dyn AgentControlPlane>,
    config: PipelineConfig,
}

impl Provisioner {
    pub fn new(
        identity: Arc<dyn IdentityService>,
        guardrails: Arc<dyn GuardrailService>,
        agents: Arc<dyn AgentControlPlane>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            identity,
            guardrails,
            agents,
            config,
        }
    }

    /// Validate `policy` and create a guardrail from it.
    #[instrument(skip_all, fields(prefix = %policy.name_prefix))]
    pub async fn create_guardrail(
        &self,
        policy: &GuardrailPolicy,
    ) -> Result<GuardrailHandle, ProvisioningError> {
        policy.validate()?;

        let name = unique_name(&policy.name_prefix, GUARDRAIL_SUFFIX_LEN);
        info!(name = %name, "Creating guardrail");

        let handle = self
            .guardrails
            .create_guardrail(&name, policy)
            .await
            .map_err(service("CreateGuardrail"))?;

        info!(id = %handle.id, version = %handle.version, "Guardrail created");
        Ok(handle)
    }

    /// Create the execution role scoped to the configured model and
    /// `guardrail`, then wait out IAM propagation.
    #[instrument(skip_all, fields(role = %self.config.role_name, guardrail = %guardrail.id))]
    pub async fn create_role(
        &self,
        guardrail: &GuardrailHandle,
    ) -> Result<ExecutionRole, ProvisioningError> {
        let policies = self.role_policies(guardrail)?;

        let (tag_key, tag_value) = CREATED_BY_TAG;
        let role = self
            .identity
            .create_role(CreateRoleRequest {
                name: self.config.role_name.clone(),
                description: ROLE_DESCRIPTION.to_string(),
                assume_role_policy: policies.trust.to_json(),
                tags: vec![Tag::new(tag_key, tag_value)],
            })
            .await
            .map_err(service("CreateRole"))?;

        self.identity
            .put_role_policy(PutRolePolicyRequest {
                role_name: role.name.clone(),
                policy_name: self.config.role_policy_name.clone(),
                document: policies.permissions.to_json(),
            })
            .await
            .map_err(service("PutRolePolicy"))?;

        // IAM has no status to poll; a fresh role may be rejected briefly
        let delay = self.config.role_propagation_delay;
        if !delay.is_zero() {
            info!(delay = ?delay, "Waiting for role propagation");
            tokio::time::sleep(delay).await;
        }

        info!(arn = %role.arn, "Role ready");
        Ok(role)
    }

    /// Trust and permission documents for a role bound to `guardrail`.
    pub fn role_policies(
        &self,
        guardrail: &GuardrailHandle,
    ) -> Result<RolePolicies, ProvisioningError> {
        let account_id = self.config.account_id()?;
        Ok(RolePolicies::new(RoleScope {
            region: &self.config.region,
            account_id,
            foundation_model: &self.config.foundation_model,
            guardrail_id: &guardrail.id,
        }))
    }

    #[instrument(skip_all, fields(role = %role.name, guardrail = %guardrail.id))]
    pub async fn create_agent(
        &self,
        role: &ExecutionRole,
        guardrail: &GuardrailHandle,
    ) -> Result<AgentHandle, ProvisioningError> {
        let name = unique_name(&self.config.agent_name_prefix, AGENT_SUFFIX_LEN);
        info!(name = %name, model = %self.config.foundation_model, "Creating agent");

        let agent = self
            .agents
            .create_agent(CreateAgentRequest {
                name,
                foundation_model: self.config.foundation_model.clone(),
                instruction: self.config.agent_instruction.clone(),
                role_arn: role.arn.clone(),
                guardrail: guardrail.clone(),
                idle_session_ttl: self.config.idle_session_ttl,
            })
            .await
            .map_err(service("CreateAgent"))?;

        info!(id = %agent.id, "Agent created");
        Ok(agent)
    }

    /// Start preparation and wait for PREPARED.
    #[instrument(skip_all, fields(agent = %agent.id))]
    pub async fn prepare_agent(
        &self,
        agent: &AgentHandle,
    ) -> Result<Readiness, ProvisioningError> {
        let status = self
            .agents
            .prepare_agent(&agent.id)
            .await
            .map_err(service("PrepareAgent"))?;
        info!(status = %status, "Preparation started");

        let interval = self.config.polling.agent_interval;
        let spec = PollSpec::prepared(format!("agent {}", agent.id), interval)
            .with_budget(&self.config.polling);
        let agents = &self.agents;
        let agent_id = agent.id.as_str();
        let readiness = wait_until(&spec, move || agents.get_agent(agent_id)).await?;

        info!(attempts = readiness.attempts, waited = ?readiness.waited, "Agent is ready");
        Ok(readiness)
    }

    /// Create an alias and wait until it routes to a prepared version.
    #[instrument(skip_all, fields(agent = %agent.id, alias = %self.config.alias_name))]
    pub async fn create_alias(
        &self,
        agent: &AgentHandle,
    ) -> Result<AliasHandle, ProvisioningError> {
        let created = self
            .agents
            .create_agent_alias(&agent.id, &self.config.alias_name)
            .await
            .map_err(service("CreateAgentAlias"))?;
        let alias_id = created.id;
        info!(alias_id = %alias_id, status = %created.state.status, "Alias created");

        let interval = self.config.polling.alias_interval;
        let spec = PollSpec::prepared(format!("alias {alias_id}"), interval)
            .with_budget(&self.config.polling);
        // Routing is read from the final status check, not a second fetch
        let latest: Mutex<Option<AliasState>> = Mutex::new(None);
        let agents = &self.agents;
        let (agent_id, alias_ref, slot) = (agent.id.as_str(), alias_id.as_str(), &latest);
        wait_until(&spec, move || async move {
            let alias = agents.get_agent_alias(agent_id, alias_ref).await?;
            let state = alias.state.clone();
            *slot.lock() = Some(alias);
            Ok::<_, ServiceError>(state)
        })
        .await?;

        let handle = latest
            .into_inner()
            .and_then(|alias| alias.handle())
            .ok_or(ProvisioningError::UnroutedAlias { alias_id })?;

        info!(
            alias_id = %handle.id,
            agent_version = %handle.agent_version,
            "Alias is ready"
        );
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ResourceState;
    use crate::simulated::{Call, SimulatedPlatform};
    use async_trait::async_trait;
    use bulwark_core::ResourceStatus;
    use std::time::Duration;

    fn config() -> PipelineConfig {
        PipelineConfig {
            account_id: Some("123456789012".to_string()),
            role_propagation_delay: Duration::from_secs(10),
            ..PipelineConfig::default()
        }
    }

    fn provisioner(platform: &Arc<SimulatedPlatform>) -> Provisioner {
        Provisioner::new(platform.clone(), platform.clone(), platform.clone(), config())
    }

    #[tokio::test(start_paused = true)]
    async fn test_guardrail_name_has_suffix() {
        let platform = Arc::new(SimulatedPlatform::new());
        let handle = provisioner(&platform)
            .create_guardrail(&GuardrailPolicy::default())
            .await
            .unwrap();

        assert_eq!(handle.version, "DRAFT");
        let name = platform
            .calls()
            .into_iter()
            .find_map(|c| match c {
                Call::CreateGuardrail { name } => Some(name),
                _ => None,
            })
            .unwrap();
        assert!(name.starts_with("demo-guardrail-"));
        assert_eq!(name.len(), "demo-guardrail-".len() + 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_policy_never_reaches_service() {
        let platform = Arc::new(SimulatedPlatform::new());
        let mut policy = GuardrailPolicy::default();
        policy.blocked_input_message.clear();

        let err = provisioner(&platform)
            .create_guardrail(&policy)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisioningError::Policy(_)));
        assert!(platform.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_role_is_tagged_and_scoped() {
        let platform = Arc::new(SimulatedPlatform::new());
        let provisioner = provisioner(&platform);
        let guardrail = GuardrailHandle::draft("gr123");

        let started = tokio::time::Instant::now();
        let role = provisioner.create_role(&guardrail).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert!(role.arn.ends_with(":role/BedrockAgentExecutionRole"));

        let created = platform.role("BedrockAgentExecutionRole").unwrap();
        assert_eq!(created.tags, vec![Tag::new("CreatedBy", "bulwark")]);

        let document = created.inline_policies.get("BedrockAgentPermissions").unwrap();
        let permissions: serde_json::Value = serde_json::from_str(document).unwrap();
        let text = permissions.to_string();
        assert!(text.contains("arn:aws:bedrock:us-east-1:123456789012:guardrail/gr123"));
        assert!(!text.contains('*'));
    }

    #[tokio::test(start_paused = true)]
    async fn test_role_requires_account() {
        let platform = Arc::new(SimulatedPlatform::new());
        let mut cfg = config();
        cfg.account_id = None;
        let provisioner =
            Provisioner::new(platform.clone(), platform.clone(), platform.clone(), cfg);

        let err = provisioner
            .create_role(&GuardrailHandle::draft("g"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProvisioningError::Config(ConfigError::MissingAccountId)
        ));
        assert!(platform.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_existing_role_is_rejected_not_retried() {
        let platform = Arc::new(SimulatedPlatform::new());
        let provisioner = provisioner(&platform);
        provisioner.create_role(&GuardrailHandle::draft("g")).await.unwrap();

        let err = provisioner
            .create_role(&GuardrailHandle::draft("g"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProvisioningError::Service {
                operation: "CreateRole",
                source: ServiceError::Rejected { .. }
            }
        ));
        let creates = platform
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::CreateRole { .. }))
            .count();
        assert_eq!(creates, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prepare_and_alias() {
        let platform = Arc::new(SimulatedPlatform::new());
        let provisioner = provisioner(&platform);
        let guardrail = GuardrailHandle::draft("g");
        let role = provisioner.create_role(&guardrail).await.unwrap();
        let agent = provisioner.create_agent(&role, &guardrail).await.unwrap();
        assert!(agent.name.starts_with("demo-agent-guardrails-"));

        let readiness = provisioner.prepare_agent(&agent).await.unwrap();
        assert_eq!(readiness.status, ResourceStatus::Prepared);
        assert_eq!(readiness.attempts, 3);

        let alias = provisioner.create_alias(&agent).await.unwrap();
        assert_eq!(alias.agent_version, "1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_prepare_failure_reports_reasons() {
        let platform = Arc::new(SimulatedPlatform::new().with_agent_statuses(&[
            ResourceStatus::Preparing,
            ResourceStatus::Failed,
        ]));
        let provisioner = provisioner(&platform);
        let guardrail = GuardrailHandle::draft("g");
        let role = provisioner.create_role(&guardrail).await.unwrap();
        let agent = provisioner.create_agent(&role, &guardrail).await.unwrap();

        let err = provisioner.prepare_agent(&agent).await.unwrap_err();
        match err {
            ProvisioningError::Readiness(ReadinessError::Failed {
                attempts, reasons, ..
            }) => {
                assert_eq!(attempts, 2);
                assert!(!reasons.is_empty());
            }
            other => panic!("expected readiness failure, got {other:?}"),
        }
    }

    async fn prepared_agent(provisioner: &Provisioner) -> AgentHandle {
        let guardrail = GuardrailHandle::draft("g");
        let role = provisioner.create_role(&guardrail).await.unwrap();
        let agent = provisioner.create_agent(&role, &guardrail).await.unwrap();
        provisioner.prepare_agent(&agent).await.unwrap();
        agent
    }

    #[tokio::test(start_paused = true)]
    async fn test_alias_failure_is_reported() {
        let platform = Arc::new(
            SimulatedPlatform::new()
                .with_alias_statuses(&[ResourceStatus::Creating, ResourceStatus::Failed]),
        );
        let provisioner = provisioner(&platform);
        let agent = prepared_agent(&provisioner).await;

        let err = provisioner.create_alias(&agent).await.unwrap_err();
        match err {
            ProvisioningError::Readiness(ReadinessError::Failed {
                resource,
                attempts,
                ..
            }) => {
                assert!(resource.starts_with("alias "));
                assert_eq!(attempts, 2);
            }
            other => panic!("expected alias failure, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_alias_attempt_budget() {
        let platform = Arc::new(
            SimulatedPlatform::new()
                .with_agent_statuses(&[ResourceStatus::Prepared])
                .with_alias_statuses(&[ResourceStatus::Creating]),
        );
        let mut cfg = config();
        cfg.polling.max_attempts = Some(3);
        let provisioner =
            Provisioner::new(platform.clone(), platform.clone(), platform.clone(), cfg);
        let agent = prepared_agent(&provisioner).await;

        let err = provisioner.create_alias(&agent).await.unwrap_err();
        assert!(matches!(
            err,
            ProvisioningError::Readiness(ReadinessError::TimedOut {
                attempts: 3,
                last: Some(ResourceStatus::Creating),
                ..
            })
        ));
        let polls = platform
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::GetAgentAlias { .. }))
            .count();
        assert_eq!(polls, 3);
    }

    /// Control plane whose alias turns PREPARED without a routing entry.
    struct UnroutedControlPlane;

    #[async_trait]
    impl AgentControlPlane for UnroutedControlPlane {
        async fn create_agent(
            &self,
            _request: CreateAgentRequest,
        ) -> Result<AgentHandle, ServiceError> {
            Err(ServiceError::rejected("CreateAgent", "not scripted"))
        }

        async fn prepare_agent(&self, _agent_id: &str) -> Result<ResourceStatus, ServiceError> {
            Err(ServiceError::rejected("PrepareAgent", "not scripted"))
        }

        async fn get_agent(&self, _agent_id: &str) -> Result<ResourceState, ServiceError> {
            Err(ServiceError::rejected("GetAgent", "not scripted"))
        }

        async fn create_agent_alias(
            &self,
            _agent_id: &str,
            _alias_name: &str,
        ) -> Result<AliasState, ServiceError> {
            Ok(AliasState {
                id: "AL1".to_string(),
                state: ResourceState::new(ResourceStatus::Creating),
                agent_version: None,
            })
        }

        async fn get_agent_alias(
            &self,
            _agent_id: &str,
            alias_id: &str,
        ) -> Result<AliasState, ServiceError> {
            Ok(AliasState {
                id: alias_id.to_string(),
                state: ResourceState::new(ResourceStatus::Prepared),
                agent_version: None,
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_prepared_alias_without_version_is_unrouted() {
        let platform = Arc::new(SimulatedPlatform::new());
        let provisioner = Provisioner::new(
            platform.clone(),
            platform,
            Arc::new(UnroutedControlPlane),
            config(),
        );
        let agent = AgentHandle {
            id: "AG1".to_string(),
            name: "demo-agent-guardrails-abc123".to_string(),
        };

        let err = provisioner.create_alias(&agent).await.unwrap_err();
        match err {
            ProvisioningError::UnroutedAlias { alias_id } => assert_eq!(alias_id, "AL1"),
            other => panic!("expected unrouted alias, got {other:?}"),
        }
    }
}
